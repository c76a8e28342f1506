//! Task entity, webhook payload and strongly-typed identifiers.
//!
//! A `Task` is the only persistent entity: one webhook delivery with its
//! retry bookkeeping. The payload is stored as opaque JSON bytes and decoded
//! into a `WebhookPayload` when a worker picks the task up.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result, ValidationError};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Task type recorded for webhook deliveries.
pub const WEBHOOK_TASK_TYPE: &str = "webhook";

/// Retry ceiling applied when the producer does not choose one.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Strongly-typed task identifier.
///
/// Assigned once at creation and sent to recipients as `X-Webhook-ID`, so it
/// doubles as the idempotency key on the receiving side.
///
/// # Example
///
/// ```
/// use hookline_core::models::TaskId;
/// let task_id = TaskId::new();
/// println!("dispatching task {task_id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Creates a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for TaskId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TaskId {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for TaskId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Task lifecycle status.
///
/// ```text
/// Pending --claim--> Processing --success--> Completed
///    ^                   |
///    +---- retry --------+--exhausted--> Failed
/// ```
///
/// `Completed` and `Failed` are terminal. A `Processing` task whose claim went
/// stale is returned to `Pending` without touching its retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting to be claimed, possibly not before `scheduled_at`.
    Pending,

    /// Claimed by exactly one worker.
    Processing,

    /// Delivered with a 2xx response.
    Completed,

    /// Gave up after exhausting retries or on a non-retryable error.
    Failed,
}

impl TaskStatus {
    /// Returns true for statuses no operation may leave.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Database and wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for TaskStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for TaskStatus {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse::<Self>().map_err(Into::into)
    }
}

/// Webhook delivery request as submitted by producers.
///
/// Fields default to empty so that a missing field surfaces as a
/// `ValidationError` naming the rule rather than a generic decode error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Absolute http(s) URL of the recipient.
    #[serde(default)]
    pub url: String,

    /// HTTP method, `POST` when absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Event type, sent as `X-Event`.
    #[serde(default)]
    pub event: String,

    /// Body sent to the recipient. Must be a non-empty JSON object.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Extra request headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// HMAC-SHA256 signing secret. No `X-Signature` is sent without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl WebhookPayload {
    /// Checks every field, returning the first violated rule.
    ///
    /// # Errors
    ///
    /// Returns the `ValidationError` for the first field that fails, checked
    /// in the order url, event, data, method, headers.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::MissingUrl);
        }

        let parsed =
            url::Url::parse(url).map_err(|e| ValidationError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ValidationError::InvalidUrl(format!("{url}: expected http or https")));
        }

        if self.event.trim().is_empty() {
            return Err(ValidationError::MissingEvent);
        }

        match &self.data {
            serde_json::Value::Object(map) if !map.is_empty() => {},
            serde_json::Value::Object(_) | serde_json::Value::Null => {
                return Err(ValidationError::MissingData);
            },
            _ => return Err(ValidationError::InvalidData),
        }

        self.http_method()?;

        for (name, value) in &self.headers {
            http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ValidationError::InvalidHeader(name.clone()))?;
            http::HeaderValue::from_str(value)
                .map_err(|_| ValidationError::InvalidHeader(name.clone()))?;
        }

        Ok(())
    }

    /// Resolves the request method, defaulting to `POST`.
    ///
    /// Method names are case-insensitive on input and sent upper-cased.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidMethod` for tokens HTTP cannot carry.
    pub fn http_method(&self) -> std::result::Result<http::Method, ValidationError> {
        match self.method.as_deref().map(str::trim) {
            None | Some("") => Ok(http::Method::POST),
            Some(method) => http::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| ValidationError::InvalidMethod(method.to_string())),
        }
    }

    /// Signing secret, treating an empty string as absent.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|secret| !secret.is_empty())
    }
}

/// Persistent unit of work: one webhook delivery and its retry state.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,

    /// Informational task kind, always `webhook` today.
    #[sqlx(rename = "type")]
    pub task_type: String,

    /// JSON-encoded `WebhookPayload`.
    pub payload: Vec<u8>,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// Failed attempts so far. Never exceeds `max_retries`.
    pub retries: i32,

    /// Retry ceiling fixed at creation.
    pub max_retries: i32,

    /// Message of the most recent failure, cleared on success.
    pub error: Option<String>,

    /// The task is not eligible for claim before this instant.
    pub scheduled_at: DateTime<Utc>,

    /// Creation time, the FIFO ordering key.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Builds a pending webhook task ready to be enqueued.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the payload cannot be encoded.
    pub fn webhook(payload: &WebhookPayload, max_retries: i32, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id: TaskId::new(),
            task_type: WEBHOOK_TASK_TYPE.to_string(),
            payload: serde_json::to_vec(payload)?,
            status: TaskStatus::Pending,
            retries: 0,
            max_retries: max_retries.max(0),
            error: None,
            scheduled_at: now,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decodes the stored payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the stored bytes are not a
    /// `WebhookPayload`.
    pub fn webhook_payload(&self) -> Result<WebhookPayload> {
        serde_json::from_slice(&self.payload).map_err(CoreError::from)
    }

    /// One-based number of the delivery attempt a claim of this task makes.
    pub fn attempt_number(&self) -> u32 {
        u32::try_from(self.retries).unwrap_or(0).saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn valid_payload() -> WebhookPayload {
        WebhookPayload {
            url: "https://example.com/hooks".to_string(),
            event: "order.created".to_string(),
            data: json!({ "order_id": 42 }),
            ..Default::default()
        }
    }

    #[test]
    fn task_status_display_format() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
        assert_eq!(TaskStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn task_status_parses_its_own_display() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
        assert!("delivering".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn valid_payload_passes_validation() {
        assert_eq!(valid_payload().validate(), Ok(()));
    }

    #[test]
    fn payload_validation_reports_first_violation() {
        let cases = [
            (WebhookPayload { url: String::new(), ..valid_payload() }, ValidationError::MissingUrl),
            (WebhookPayload { url: "   ".to_string(), ..valid_payload() }, ValidationError::MissingUrl),
            (WebhookPayload { event: String::new(), ..valid_payload() }, ValidationError::MissingEvent),
            (
                WebhookPayload { data: serde_json::Value::Null, ..valid_payload() },
                ValidationError::MissingData,
            ),
            (WebhookPayload { data: json!({}), ..valid_payload() }, ValidationError::MissingData),
            (WebhookPayload { data: json!([1, 2]), ..valid_payload() }, ValidationError::InvalidData),
            (
                WebhookPayload { method: Some("BAD METHOD".to_string()), ..valid_payload() },
                ValidationError::InvalidMethod("BAD METHOD".to_string()),
            ),
        ];

        for (payload, expected) in cases {
            assert_eq!(payload.validate(), Err(expected));
        }
    }

    #[test]
    fn non_http_urls_rejected() {
        for url in ["ftp://example.com/hook", "not a url", "mailto:ops@example.com"] {
            let payload = WebhookPayload { url: url.to_string(), ..valid_payload() };
            assert!(
                matches!(payload.validate(), Err(ValidationError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn invalid_header_rejected() {
        let mut payload = valid_payload();
        payload.headers.insert("X-Bad\nName".to_string(), "value".to_string());

        assert!(matches!(payload.validate(), Err(ValidationError::InvalidHeader(_))));
    }

    #[test]
    fn method_defaults_to_post_and_is_upper_cased() {
        let mut payload = valid_payload();
        assert_eq!(payload.http_method(), Ok(http::Method::POST));

        payload.method = Some(String::new());
        assert_eq!(payload.http_method(), Ok(http::Method::POST));

        payload.method = Some("put".to_string());
        assert_eq!(payload.http_method(), Ok(http::Method::PUT));
    }

    #[test]
    fn empty_secret_is_treated_as_absent() {
        let mut payload = valid_payload();
        assert_eq!(payload.signing_secret(), None);

        payload.secret = Some(String::new());
        assert_eq!(payload.signing_secret(), None);

        payload.secret = Some("s3cret".to_string());
        assert_eq!(payload.signing_secret(), Some("s3cret"));
    }

    #[test]
    fn missing_fields_deserialize_to_validation_errors() {
        let payload: WebhookPayload =
            serde_json::from_value(json!({ "event": "ping", "data": { "a": 1 } })).unwrap();

        assert_eq!(payload.validate(), Err(ValidationError::MissingUrl));
    }

    #[test]
    fn webhook_task_starts_pending_and_round_trips_payload() {
        let now = Utc::now();
        let payload = valid_payload();

        let task = Task::webhook(&payload, DEFAULT_MAX_RETRIES, now).unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.task_type, WEBHOOK_TASK_TYPE);
        assert_eq!(task.retries, 0);
        assert_eq!(task.max_retries, 5);
        assert_eq!(task.scheduled_at, now);
        assert_eq!(task.created_at, now);
        assert_eq!(task.attempt_number(), 1);
        assert_eq!(task.webhook_payload().unwrap(), payload);
    }

    #[test]
    fn negative_max_retries_clamped_to_zero() {
        let task = Task::webhook(&valid_payload(), -3, Utc::now()).unwrap();
        assert_eq!(task.max_retries, 0);
    }

    #[test]
    fn task_id_binds_as_its_uuid() {
        let task_id = TaskId::new();
        let mut bound = PgArgumentBuffer::default();
        let mut raw = PgArgumentBuffer::default();

        sqlx::Encode::<PgDb>::encode_by_ref(&task_id, &mut bound).unwrap();
        sqlx::Encode::<PgDb>::encode_by_ref(&task_id.0, &mut raw).unwrap();

        assert_eq!(
            <TaskId as sqlx::Type<PgDb>>::type_info(),
            <Uuid as sqlx::Type<PgDb>>::type_info()
        );
        assert_eq!(&**bound, &**raw);
        assert_eq!(&**bound, task_id.0.as_bytes());
    }
}
