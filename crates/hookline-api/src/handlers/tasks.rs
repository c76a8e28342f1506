//! Task submission and status handlers.
//!
//! `POST /tasks` validates a webhook payload and enqueues it; nothing is
//! persisted unless validation passes. `GET /tasks/{task_id}` exposes the
//! task's delivery state but never its payload or signing secret.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookline_core::{
    models::{Task, TaskId, TaskStatus, WebhookPayload},
    ValidationError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::error_response;
use crate::AppState;

/// Request body for task submission.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    /// Webhook to deliver.
    #[serde(flatten)]
    pub payload: WebhookPayload,

    /// Retry budget, the server default when absent.
    #[serde(default)]
    pub max_retries: Option<i32>,
}

/// Response from a successful submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    /// Identifier of the queued task
    pub task_id: String,
    /// Always `queued`
    pub status: String,
}

/// Public view of a task.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskView {
    /// Task identifier
    pub id: String,
    /// Task kind
    #[serde(rename = "type")]
    pub task_type: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Failed attempts so far
    pub retries: i32,
    /// Retry ceiling
    pub max_retries: i32,
    /// Most recent failure, if any
    pub error: Option<String>,
    /// Earliest time of the next attempt
    pub scheduled_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        Self {
            id: task.id.to_string(),
            task_type: task.task_type,
            status: task.status,
            retries: task.retries,
            max_retries: task.max_retries,
            error: task.error,
            scheduled_at: task.scheduled_at,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Validates and enqueues a webhook task.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: Body is not JSON or the payload fails validation
/// - 413: Body exceeds the size limit
/// - 503: The queue could not persist the task
#[instrument(name = "create_task", skip(state, body), fields(body_size = body.len()))]
pub async fn create_task(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CreateTaskRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejected malformed task request");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_json",
                format!("request body is not a valid task: {e}"),
            );
        },
    };

    if let Err(e) = request.payload.validate() {
        warn!(code = e.code(), error = %e, "rejected invalid webhook payload");
        return validation_error_response(&e);
    }

    let max_retries = request.max_retries.unwrap_or(state.default_max_retries);
    if max_retries < 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_max_retries",
            "max_retries must not be negative",
        );
    }

    let task = match Task::webhook(&request.payload, max_retries, state.clock.now_utc()) {
        Ok(task) => task,
        Err(e) => {
            error!(error = %e, "failed to encode task payload");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                e.to_string(),
            );
        },
    };

    match state.queue.create(task).await {
        Ok(task_id) => {
            info!(
                task_id = %task_id,
                event = %request.payload.event,
                max_retries,
                "task queued"
            );
            (
                StatusCode::ACCEPTED,
                Json(CreateTaskResponse { task_id: task_id.to_string(), status: "queued".into() }),
            )
                .into_response()
        },
        Err(e) => {
            error!(error = %e, "failed to persist task");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                "task could not be stored, retry later",
            )
        },
    }
}

/// Returns the status view of one task.
///
/// # Errors
///
/// - 400: The id is not a UUID
/// - 404: No task has this id
/// - 503: The queue could not be read
#[instrument(name = "get_task", skip(state))]
pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    let Ok(uuid) = Uuid::parse_str(&task_id) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_task_id",
            format!("{task_id} is not a valid task id"),
        );
    };

    match state.queue.find(TaskId::from(uuid)).await {
        Ok(Some(task)) => {
            debug!(task_id = %task.id, status = %task.status, "task found");
            (StatusCode::OK, Json(TaskView::from(task))).into_response()
        },
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "task_not_found",
            format!("task {task_id} not found"),
        ),
        Err(e) => {
            error!(task_id = %task_id, error = %e, "failed to load task");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                "task could not be loaded, retry later",
            )
        },
    }
}

fn validation_error_response(error: &ValidationError) -> Response {
    error_response(StatusCode::BAD_REQUEST, error.code(), error.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_accepts_optional_max_retries() {
        let request: CreateTaskRequest = serde_json::from_value(json!({
            "url": "https://example.com/hook",
            "event": "ping",
            "data": { "a": 1 },
            "max_retries": 2
        }))
        .unwrap();

        assert_eq!(request.max_retries, Some(2));
        assert_eq!(request.payload.event, "ping");
        assert!(request.payload.validate().is_ok());
    }

    #[test]
    fn task_view_omits_payload() {
        let payload = WebhookPayload {
            url: "https://example.com/hook".to_string(),
            event: "ping".to_string(),
            data: json!({ "a": 1 }),
            secret: Some("top-secret".to_string()),
            ..Default::default()
        };
        let task = Task::webhook(&payload, 3, Utc::now()).unwrap();

        let view = serde_json::to_string(&TaskView::from(task)).unwrap();

        assert!(!view.contains("top-secret"));
        assert!(!view.contains("payload"));
        assert!(view.contains(r#""status":"pending""#));
        assert!(view.contains(r#""type":"webhook""#));
    }
}
