//! Hookline HTTP ingress.
//!
//! Accepts webhook tasks from producers, validates them and enqueues them for
//! the delivery engine. Also hosts the service configuration shared by the
//! binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{sync::Arc, time::Duration};

use hookline_core::{models::DEFAULT_MAX_RETRIES, Clock};
use hookline_delivery::queue::TaskQueue;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use server::{create_router, serve, start_server};

/// Default per-request timeout for the ingress API.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Queue new tasks are written to.
    pub queue: Arc<dyn TaskQueue>,
    /// Time source for timestamps.
    pub clock: Arc<dyn Clock>,
    /// Retry budget for tasks that do not specify one.
    pub default_max_retries: i32,
    /// Upper bound on handling a single request.
    pub request_timeout: Duration,
}

impl AppState {
    /// Creates state with the default retry budget and request timeout.
    pub fn new(queue: Arc<dyn TaskQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            clock,
            default_max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Overrides the retry budget applied when a request omits one.
    #[must_use]
    pub fn with_default_max_retries(mut self, max_retries: i32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
