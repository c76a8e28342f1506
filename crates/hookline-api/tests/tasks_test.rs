//! Integration tests for task submission and lookup.
//!
//! Drives the full router, middleware included, with `oneshot` requests
//! against the in-memory queue.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use hookline_api::{create_router, handlers::ErrorResponse, AppState};
use chrono::{DateTime, Utc};
use hookline_core::{
    models::{Task, TaskId, TaskStatus, WebhookPayload},
    time::TestClock,
    Clock, Result,
};
use hookline_delivery::queue::{mock::InMemoryTaskQueue, TaskQueue};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    queue: Arc<InMemoryTaskQueue>,
    clock: TestClock,
}

fn test_app() -> TestApp {
    let clock = TestClock::new();
    let queue = Arc::new(InMemoryTaskQueue::new(Arc::new(clock.clone())));
    let state = AppState::new(queue.clone(), Arc::new(clock.clone())).with_default_max_retries(5);
    TestApp { router: create_router(state), queue, clock }
}

fn post_tasks(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/tasks")
        .header(CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("build request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("build request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn valid_request() -> Value {
    json!({
        "url": "https://example.com/webhooks/orders",
        "event": "order.created",
        "data": { "order_id": 42, "total": "19.99" },
        "headers": { "Authorization": "Bearer abc" },
        "secret": "whsec_123"
    })
}

#[tokio::test]
async fn valid_task_is_queued() {
    let app = test_app();

    let response =
        app.router.oneshot(post_tasks(valid_request().to_string())).await.expect("request");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");

    let task_id: TaskId = uuid::Uuid::parse_str(body["task_id"].as_str().unwrap()).unwrap().into();
    let task = app.queue.get(task_id).await.expect("task persisted");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retries, 0);
    assert_eq!(task.max_retries, 5);
    assert_eq!(task.created_at, app.clock.now_utc());

    let payload: WebhookPayload = task.webhook_payload().unwrap();
    assert_eq!(payload.event, "order.created");
    assert_eq!(payload.data, json!({ "order_id": 42, "total": "19.99" }));
    assert_eq!(payload.headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
    assert_eq!(payload.signing_secret(), Some("whsec_123"));
}

#[tokio::test]
async fn explicit_max_retries_is_honoured() {
    let app = test_app();
    let mut request = valid_request();
    request["max_retries"] = json!(2);

    let response = app.router.oneshot(post_tasks(request.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let tasks = app.queue.snapshot().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].max_retries, 2);
}

#[tokio::test]
async fn missing_url_is_rejected_and_not_persisted() {
    let app = test_app();
    let request = json!({ "event": "order.created", "data": { "order_id": 42 } });

    let response = app.router.oneshot(post_tasks(request.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(body.error.code, "missing_url");
    assert_eq!(body.error.message, "webhook URL is required");
    assert!(app.queue.snapshot().await.is_empty());
}

#[tokio::test]
async fn each_validation_rule_has_its_own_code() {
    let cases = [
        (json!({ "url": "ftp://example.com", "event": "e", "data": { "a": 1 } }), "invalid_url"),
        (json!({ "url": "https://example.com", "data": { "a": 1 } }), "missing_event"),
        (json!({ "url": "https://example.com", "event": "e" }), "missing_data"),
        (json!({ "url": "https://example.com", "event": "e", "data": {} }), "missing_data"),
        (json!({ "url": "https://example.com", "event": "e", "data": [1] }), "invalid_data"),
        (
            json!({ "url": "https://example.com", "event": "e", "data": { "a": 1 }, "method": "NO PE" }),
            "invalid_method",
        ),
        (
            json!({ "url": "https://example.com", "event": "e", "data": { "a": 1 }, "max_retries": -1 }),
            "invalid_max_retries",
        ),
    ];

    for (request, expected_code) in cases {
        let app = test_app();
        let response = app.router.oneshot(post_tasks(request.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{expected_code}");
        assert_eq!(json_body(response).await["error"]["code"], expected_code);
        assert!(app.queue.snapshot().await.is_empty());
    }
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = test_app();

    let response = app.router.oneshot(post_tasks("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_json");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = test_app();
    let mut request = valid_request();
    request["data"]["blob"] = json!("x".repeat(2 * 1024 * 1024));

    let response = app.router.oneshot(post_tasks(request.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.queue.snapshot().await.is_empty());
}

#[tokio::test]
async fn storage_failure_returns_service_unavailable() {
    let app = test_app();
    let payload: WebhookPayload = serde_json::from_value(valid_request()).unwrap();
    let existing = Task::webhook(&payload, 5, app.clock.now_utc()).unwrap();
    let existing_id = existing.id;
    app.queue.insert(existing).await;

    let state = AppState::new(
        Arc::new(DuplicateIdQueue { inner: app.queue.clone(), id: existing_id }),
        Arc::new(app.clock.clone()),
    );

    let response =
        create_router(state).oneshot(post_tasks(valid_request().to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "storage_unavailable");
    assert_eq!(app.queue.snapshot().await.len(), 1);
}

#[tokio::test]
async fn submitted_task_can_be_looked_up() {
    let app = test_app();
    let response =
        app.router.clone().oneshot(post_tasks(valid_request().to_string())).await.unwrap();
    let task_id = json_body(response).await["task_id"].as_str().unwrap().to_string();

    let response = app.router.oneshot(get(&format!("/tasks/{task_id}"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], task_id);
    assert_eq!(body["type"], "webhook");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["retries"], 0);
    assert_eq!(body["max_retries"], 5);
    assert!(body["error"].is_null());
    assert!(body.get("payload").is_none());
    assert!(!body.to_string().contains("whsec_123"));
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let app = test_app();

    let response =
        app.router.oneshot(get(&format!("/tasks/{}", uuid::Uuid::new_v4()))).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "task_not_found");
}

#[tokio::test]
async fn malformed_task_id_is_bad_request() {
    let app = test_app();

    let response = app.router.oneshot(get("/tasks/not-a-uuid")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "invalid_task_id");
}

#[tokio::test]
async fn every_response_carries_request_id() {
    let app = test_app();

    let ok = app.router.clone().oneshot(post_tasks(valid_request().to_string())).await.unwrap();
    let rejected = app.router.oneshot(post_tasks("{}")).await.unwrap();

    for response in [ok, rejected] {
        let request_id = response.headers().get("x-request-id").expect("x-request-id header");
        assert!(uuid::Uuid::parse_str(request_id.to_str().unwrap()).is_ok());
    }
}

/// Queue whose writes always collide with an existing task id, which the
/// in-memory queue rejects as a storage error.
struct DuplicateIdQueue {
    inner: Arc<InMemoryTaskQueue>,
    id: TaskId,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

impl TaskQueue for DuplicateIdQueue {
    fn create(&self, mut task: Task) -> BoxFuture<'_, TaskId> {
        task.id = self.id;
        self.inner.create(task)
    }

    fn claim(&self) -> BoxFuture<'_, Option<Task>> {
        self.inner.claim()
    }

    fn complete(&self, task_id: TaskId) -> BoxFuture<'_, ()> {
        self.inner.complete(task_id)
    }

    fn fail(
        &self,
        task_id: TaskId,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, ()> {
        self.inner.fail(task_id, message, retry_at)
    }

    fn requeue_stale(&self, older_than: Duration) -> BoxFuture<'_, u64> {
        self.inner.requeue_stale(older_than)
    }

    fn find(&self, task_id: TaskId) -> BoxFuture<'_, Option<Task>> {
        self.inner.find(task_id)
    }

    fn health_check(&self) -> BoxFuture<'_, ()> {
        self.inner.health_check()
    }
}
