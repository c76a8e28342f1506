//! Core task model and persistence for the hookline webhook queue.
//!
//! Provides the strongly-typed task entity, webhook payload validation,
//! the PostgreSQL repository that implements the atomic claim protocol, and
//! the clock abstraction every time-dependent component is built on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result, ValidationError};
pub use models::{Task, TaskId, TaskStatus, WebhookPayload};
pub use time::{Clock, RealClock, TestClock};
