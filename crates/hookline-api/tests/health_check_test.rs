//! Integration tests for the health and liveness endpoints.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::{body::Body, http::Request, http::StatusCode};
use hookline_api::{
    create_router,
    handlers::health::{ComponentStatus, HealthResponse, HealthStatus},
    AppState,
};
use hookline_core::{time::TestClock, Clock};
use hookline_delivery::queue::mock::InMemoryTaskQueue;
use serde_json::Value;
use tower::ServiceExt;

fn app() -> (axum::Router, Arc<InMemoryTaskQueue>) {
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());
    let queue = Arc::new(InMemoryTaskQueue::new(clock.clone()));
    (create_router(AppState::new(queue.clone(), clock)), queue)
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("build request"))
        .await
        .expect("request");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("read body");
    (status, body.to_vec())
}

#[tokio::test]
async fn health_reports_healthy_queue() {
    let (router, _queue) = app();

    let (status, body) = get(router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.checks.queue.status, ComponentStatus::Up);
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_reports_unavailable_queue() {
    let (router, queue) = app();
    queue.set_unavailable(true).await;

    let (status, body) = get(router, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let health: HealthResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.checks.queue.status, ComponentStatus::Down);
    assert!(health.checks.queue.message.is_some());
}

#[tokio::test]
async fn liveness_ignores_queue_state() {
    let (router, queue) = app();
    queue.set_unavailable(true).await;

    let (status, body) = get(router, "/live").await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "alive");
    assert_eq!(body["service"], "hookline");
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let (router, _queue) = app();

    let (status, _) = get(router, "/ready").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
