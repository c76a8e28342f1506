//! Webhook dispatch engine with at-least-once guarantees.
//!
//! This crate turns pending tasks into HTTP calls. A pool of async workers
//! claims tasks through the [`queue::TaskQueue`] seam, hands each one to the
//! [`client::DeliveryClient`], and records the outcome back in the queue,
//! scheduling retries with exponential backoff until a task succeeds or its
//! retry budget runs out.
//!
//! # Architecture
//!
//! Each worker runs the same loop:
//!
//! 1. **Claim** - take the oldest eligible pending task (`FOR UPDATE SKIP
//!    LOCKED` in PostgreSQL)
//! 2. **Dispatch** - one HTTP attempt with signing and a fixed timeout
//! 3. **Resolve** - mark completed, schedule a retry, or mark failed
//!
//! A reaper task next to the workers returns claims orphaned by a crash to
//! the queue. All tasks share one `CancellationToken`; an in-flight delivery
//! always finishes and records its outcome before its worker exits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookline_core::{storage::Storage, time::RealClock};
//! use hookline_delivery::{queue::PostgresTaskQueue, DeliveryConfig, DeliveryEngine, DeliveryError};
//!
//! # async fn example(storage: Arc<Storage>) -> std::result::Result<(), DeliveryError> {
//! let clock = Arc::new(RealClock::new());
//! let queue = Arc::new(PostgresTaskQueue::new(storage));
//!
//! let mut engine = DeliveryEngine::new(queue, DeliveryConfig::default(), clock)?;
//! engine.start().await?;
//!
//! // ... later
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod queue;
pub mod retry;
pub mod signing;
pub mod worker;
pub mod worker_pool;

pub use engine::DeliveryEngine;
pub use error::{DeliveryError, Result};
pub use worker::{DeliveryConfig, EngineStats};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
