//! Error types for task persistence and payload validation.
//!
//! `CoreError` covers everything that can go wrong talking to the task store.
//! `ValidationError` covers malformed webhook payloads, which are rejected at
//! ingress and never reach the store.

use thiserror::Error;

use crate::models::{TaskId, TaskStatus};

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by task storage operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The task was not in the state the operation requires.
    ///
    /// Raised when `complete` or `fail` targets a task that is no longer
    /// `processing`, which keeps terminal states stable.
    #[error("task {task_id} is not {expected}")]
    InvalidTransition {
        /// Task the transition was attempted on
        task_id: TaskId,
        /// Status the task had to be in
        expected: TaskStatus,
    },

    /// Task payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested task not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::Database(format!("check constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Database(format!("unique constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reasons a webhook payload is rejected before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The `url` field is absent or empty.
    #[error("webhook URL is required")]
    MissingUrl,

    /// The `url` field is not an absolute http(s) URL.
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(String),

    /// The `event` field is absent or empty.
    #[error("event type is required")]
    MissingEvent,

    /// The `data` field is absent or an empty object.
    #[error("data payload is required")]
    MissingData,

    /// The `data` field is present but not a JSON object.
    #[error("data payload must be a JSON object")]
    InvalidData,

    /// The `method` field is not a valid HTTP method token.
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// A custom header name or value cannot be sent over HTTP.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl ValidationError {
    /// Stable machine-readable code for API error responses.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingUrl => "missing_url",
            Self::InvalidUrl(_) => "invalid_url",
            Self::MissingEvent => "missing_event",
            Self::MissingData => "missing_data",
            Self::InvalidData => "invalid_data",
            Self::InvalidMethod(_) => "invalid_method",
            Self::InvalidHeader(_) => "invalid_header",
        }
    }
}
