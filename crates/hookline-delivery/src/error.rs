//! Error types for webhook delivery operations.
//!
//! Covers failures of a single dispatch attempt (network, timeout, non-2xx
//! status, unusable payload) and of the pool that drives the attempts
//! (configuration, storage, shutdown). Each error knows whether the task that
//! produced it deserves another attempt.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while dispatching webhooks or running the worker pool.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Connection could not be established or broke mid-request.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// No response arrived within the client timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Recipient answered with a status outside `[200, 300)`.
    #[error("recipient returned error status: {status_code}")]
    HttpStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body, truncated
        body: String,
    },

    /// Stored payload cannot be turned into a request.
    #[error("invalid webhook payload: {message}")]
    InvalidPayload {
        /// What is wrong with the payload
        message: String,
    },

    /// Task queue operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying storage error message
        message: String,
    },

    /// Engine or client settings are unusable.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Every allowed attempt failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker
        worker_id: usize,
        /// Panic or join error message
        error: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates an error for a non-2xx response.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload { message: message.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a retries exhausted error wrapping the final failure.
    pub fn retries_exhausted(attempts: u32, last_error: &DeliveryError) -> Self {
        Self::RetriesExhausted { attempts, last_error: last_error.to_string() }
    }

    /// Determines if this error represents a temporary failure that should be
    /// retried.
    ///
    /// Returns `true` for network errors, timeouts, non-2xx responses and
    /// storage failures. A payload that cannot be sent will never become
    /// sendable, so `InvalidPayload` is final, as are configuration and
    /// pool-level errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::Storage { .. } => true,

            Self::InvalidPayload { .. }
            | Self::Configuration { .. }
            | Self::RetriesExhausted { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. } => false,
        }
    }
}

impl From<hookline_core::CoreError> for DeliveryError {
    fn from(err: hookline_core::CoreError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Category of delivery error, used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection failures and timeouts.
    Network,
    /// HTTP 4xx responses.
    Client,
    /// HTTP 5xx and other non-2xx responses.
    Server,
    /// Unusable payloads.
    Payload,
    /// Task queue failures.
    Storage,
    /// Configuration and worker lifecycle problems.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Network { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::HttpStatus { status_code: 400..=499, .. } => Self::Client,
            DeliveryError::HttpStatus { .. } => Self::Server,
            DeliveryError::InvalidPayload { .. } => Self::Payload,
            DeliveryError::Storage { .. } => Self::Storage,
            DeliveryError::Configuration { .. }
            | DeliveryError::RetriesExhausted { .. }
            | DeliveryError::ShutdownTimeout { .. }
            | DeliveryError::WorkerPanic { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Payload => write!(f, "payload"),
            Self::Storage => write!(f, "storage"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(Duration::from_secs(10)).is_retryable());
        assert!(DeliveryError::http_status(500, "internal server error").is_retryable());
        assert!(DeliveryError::http_status(404, "not found").is_retryable());
        assert!(DeliveryError::storage("connection lost").is_retryable());

        assert!(!DeliveryError::invalid_payload("bad method").is_retryable());
        assert!(!DeliveryError::configuration("zero workers").is_retryable());
        assert!(!DeliveryError::retries_exhausted(6, &DeliveryError::network("x")).is_retryable());
        assert!(!DeliveryError::ShutdownTimeout { timeout: Duration::from_secs(1) }.is_retryable());
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("test")), ErrorCategory::Network);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::http_status(400, "bad request")),
            ErrorCategory::Client
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::http_status(503, "unavailable")),
            ErrorCategory::Server
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::invalid_payload("x")),
            ErrorCategory::Payload
        );
        assert_eq!(ErrorCategory::Storage.to_string(), "storage");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            DeliveryError::timeout(Duration::from_secs(10)).to_string(),
            "request timed out after 10000ms"
        );
        assert_eq!(
            DeliveryError::http_status(500, "oops").to_string(),
            "recipient returned error status: 500"
        );

        let exhausted = DeliveryError::retries_exhausted(6, &DeliveryError::http_status(500, ""));
        assert_eq!(
            exhausted.to_string(),
            "delivery failed after 6 attempts: recipient returned error status: 500"
        );
    }

    #[test]
    fn core_errors_become_storage_errors() {
        let err: DeliveryError = hookline_core::CoreError::Database("pool closed".into()).into();
        assert!(matches!(err, DeliveryError::Storage { .. }));
        assert_eq!(err.to_string(), "storage error: database error: pool closed");
    }
}
