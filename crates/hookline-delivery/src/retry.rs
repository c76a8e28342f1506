//! Exponential backoff for failed deliveries.
//!
//! The n-th retry of a task (zero-based `retries` already recorded) waits
//! `2^(retries + 1)` seconds: 2s, 4s, 8s, 16s, 32s for the default budget of
//! five retries. The curve is deterministic unless jitter is explicitly
//! enabled.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Largest exponent applied before saturating.
const MAX_EXPONENT: u32 = 32;

/// Retry policy for webhook delivery.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Upper bound for any single delay. `None` keeps the pure curve.
    pub max_delay: Option<Duration>,

    /// Jitter fraction (0.0 to 1.0) applied around the computed delay.
    /// Zero disables jitter.
    pub jitter_factor: f64,
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt again after `delay`.
    Retry {
        /// How long the task must wait before it is claimable again
        delay: Duration,
    },
    /// Do not retry, the task fails permanently.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Creates a policy that caps every delay at `max_delay`.
    pub fn capped(max_delay: Duration) -> Self {
        Self { max_delay: Some(max_delay), ..Self::default() }
    }

    /// Whether a task with `retries` failed attempts may be retried.
    pub fn should_retry(&self, retries: i32, max_retries: i32) -> bool {
        retries < max_retries
    }

    /// Delay before the next attempt of a task that has failed `retries`
    /// times so far.
    ///
    /// Saturates instead of overflowing for very large retry counts.
    pub fn delay_for(&self, retries: i32) -> Duration {
        let exponent = u32::try_from(retries).unwrap_or(0).saturating_add(1).min(MAX_EXPONENT);
        let delay = Duration::from_secs(1u64 << exponent);

        let capped = match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        };

        apply_jitter(capped, self.jitter_factor)
    }

    /// Decides what happens to a task after a retryable failure.
    pub fn decide(&self, retries: i32, max_retries: i32) -> RetryDecision {
        if self.should_retry(retries, max_retries) {
            RetryDecision::Retry { delay: self.delay_for(retries) }
        } else {
            RetryDecision::GiveUp { reason: format!("maximum retries ({max_retries}) reached") }
        }
    }
}

/// Randomizes `duration` by up to `±jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
