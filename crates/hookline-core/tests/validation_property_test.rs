//! Property-based tests for webhook payload validation.
//!
//! Generates payloads around the validation boundaries and checks that the
//! first violated rule is always the one reported.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use chrono::Utc;
use hookline_core::{Task, TaskStatus, ValidationError, WebhookPayload};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

fn host() -> impl Strategy<Value = String> {
    "[a-z]{1,12}(\\.[a-z]{2,6}){1,2}"
}

fn path() -> impl Strategy<Value = String> {
    "(/[a-zA-Z0-9_-]{1,10}){0,3}"
}

fn event() -> impl Strategy<Value = String> {
    "[a-z]{1,10}\\.[a-z_]{1,12}"
}

fn object() -> impl Strategy<Value = Value> {
    prop::collection::hash_map("[a-z]{1,8}", any::<i64>(), 1..6)
        .prop_map(|fields| Value::Object(fields.into_iter().map(|(k, v)| (k, json!(v))).collect()))
}

fn valid_payload() -> impl Strategy<Value = WebhookPayload> {
    (
        prop_oneof![Just("http"), Just("https")],
        host(),
        path(),
        event(),
        object(),
        prop::option::of(prop_oneof![Just("post"), Just("PUT"), Just("patch"), Just("")]),
    )
        .prop_map(|(scheme, host, path, event, data, method)| WebhookPayload {
            url: format!("{scheme}://{host}{path}"),
            method: method.map(str::to_string),
            event,
            data,
            headers: HashMap::new(),
            secret: None,
        })
}

proptest! {
    #[test]
    fn well_formed_payloads_validate(payload in valid_payload()) {
        prop_assert!(payload.validate().is_ok(), "{payload:?}");

        let method = payload.http_method().unwrap();
        match payload.method.as_deref() {
            None | Some("") => prop_assert_eq!(method, http::Method::POST),
            Some(raw) => prop_assert_eq!(method.as_str(), raw.to_ascii_uppercase()),
        }
    }

    #[test]
    fn non_http_schemes_are_rejected(
        payload in valid_payload(),
        scheme in prop_oneof![Just("ftp"), Just("ws"), Just("file"), Just("mailto")],
    ) {
        let rest = payload.url.split_once("://").map(|(_, rest)| rest.to_string()).unwrap();
        let payload = WebhookPayload { url: format!("{scheme}://{rest}"), ..payload };

        prop_assert!(matches!(payload.validate(), Err(ValidationError::InvalidUrl(_))));
    }

    #[test]
    fn blank_fields_report_in_rule_order(
        payload in valid_payload(),
        blank in "[ \t]{0,3}",
    ) {
        let no_url = WebhookPayload { url: blank.clone(), event: blank.clone(), ..payload.clone() };
        prop_assert_eq!(no_url.validate(), Err(ValidationError::MissingUrl));

        let no_event = WebhookPayload { event: blank, data: Value::Null, ..payload.clone() };
        prop_assert_eq!(no_event.validate(), Err(ValidationError::MissingEvent));

        let empty_data = WebhookPayload { data: Value::Object(Map::new()), ..payload };
        prop_assert_eq!(empty_data.validate(), Err(ValidationError::MissingData));
    }

    #[test]
    fn non_object_data_is_invalid(
        payload in valid_payload(),
        data in prop_oneof![
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,10}".prop_map(Value::String),
            any::<bool>().prop_map(Value::Bool),
            prop::collection::vec(any::<i32>(), 0..4).prop_map(|v| json!(v)),
        ],
    ) {
        let payload = WebhookPayload { data, ..payload };
        prop_assert_eq!(payload.validate(), Err(ValidationError::InvalidData));
    }

    #[test]
    fn new_tasks_start_pending_with_a_clamped_budget(
        payload in valid_payload(),
        max_retries in -10i32..20,
    ) {
        let now = Utc::now();
        let task = Task::webhook(&payload, max_retries, now).unwrap();

        prop_assert_eq!(task.status, TaskStatus::Pending);
        prop_assert_eq!(task.retries, 0);
        prop_assert_eq!(task.max_retries, max_retries.max(0));
        prop_assert_eq!(task.scheduled_at, now);
        prop_assert_eq!(task.attempt_number(), 1);
        prop_assert_eq!(task.webhook_payload().unwrap(), payload);
    }
}
