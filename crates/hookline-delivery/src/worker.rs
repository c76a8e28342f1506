//! Delivery worker: the claim, dispatch and resolve loop.
//!
//! Each worker repeatedly claims one task, performs a single delivery
//! attempt and records the outcome. Storage failures never end a worker;
//! they are logged and followed by the idle backoff. A failure to record an
//! outcome is retried until the store accepts it, so a finished attempt is
//! never delivered twice because its result was lost.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookline_core::{
    models::{Task, TaskId, WebhookPayload},
    Clock, CoreError,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    error::{DeliveryError, ErrorCategory, Result},
    queue::TaskQueue,
    retry::{RetryDecision, RetryPolicy},
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// How long an idle worker waits before polling again. Also the backoff
    /// after a storage error.
    pub poll_interval: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Backoff applied to retryable failures.
    pub retry_policy: RetryPolicy,

    /// Claims untouched for this long are returned to the queue. `None`
    /// disables the reaper.
    pub stale_after: Option<Duration>,

    /// How often the reaper looks for stale claims.
    pub reaper_interval: Duration,

    /// Upper bound on graceful shutdown. `None` waits for every worker.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            poll_interval: Duration::from_secs(1),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            stale_after: Some(Duration::from_secs(300)),
            reaper_interval: Duration::from_secs(30),
            shutdown_timeout: None,
        }
    }
}

/// Statistics for delivery engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of running delivery workers.
    pub active_workers: usize,
    /// Tasks claimed since startup.
    pub tasks_claimed: u64,
    /// Tasks delivered successfully.
    pub tasks_completed: u64,
    /// Failed attempts that were scheduled for retry.
    pub tasks_retried: u64,
    /// Tasks that failed permanently.
    pub tasks_failed: u64,
    /// Queue operations that returned an error.
    pub storage_errors: u64,
    /// Deliveries currently in progress.
    pub in_flight_deliveries: u64,
    /// Stale claims returned to the queue by the reaper.
    pub stale_recovered: u64,
}

/// Individual worker that processes webhook deliveries.
pub struct DeliveryWorker {
    id: usize,
    queue: Arc<dyn TaskQueue>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    pub fn new(
        id: usize,
        queue: Arc<dyn TaskQueue>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, queue, config, client, stats, cancellation_token, clock }
    }

    /// Main worker loop - claims and processes tasks until cancelled.
    ///
    /// Cancellation is checked once per iteration and during idle waits, so
    /// a delivery that has started always runs to completion and has its
    /// outcome recorded before the loop exits.
    ///
    /// # Errors
    ///
    /// Never returns an error today; per-task failures are logged and the
    /// loop continues.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.process_next().await {
                Ok(true) => {},
                Ok(false) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Err(error) => {
                    self.stats.write().await.storage_errors += 1;
                    error!(
                        worker_id = self.id,
                        error = %error,
                        category = %ErrorCategory::from(&error),
                        "worker iteration failed"
                    );
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Claims and processes at most one task.
    ///
    /// Returns `Ok(true)` when a task was claimed and resolved, `Ok(false)`
    /// when nothing was eligible.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if claiming the task fails, or if the
    /// task left `processing` before its outcome could be recorded.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(task) = self
            .queue
            .claim()
            .await
            .map_err(|e| DeliveryError::storage(format!("failed to claim task: {e}")))?
        else {
            return Ok(false);
        };

        self.stats.write().await.tasks_claimed += 1;
        debug!(
            worker_id = self.id,
            task_id = %task.id,
            attempt = task.attempt_number(),
            "claimed task"
        );

        self.process_task(&task).await?;
        Ok(true)
    }

    async fn process_task(&self, task: &Task) -> Result<()> {
        let payload = match decode_payload(task) {
            Ok(payload) => payload,
            Err(error) => return self.fail_permanently(task, &error).await,
        };

        self.stats.write().await.in_flight_deliveries += 1;
        let start_time = self.clock.now();

        let result = self.client.deliver(task.id, &payload).await;

        let duration = self.clock.now().saturating_duration_since(start_time);
        self.stats.write().await.in_flight_deliveries -= 1;

        match result {
            Ok(response) => {
                self.record_outcome(task.id, &Outcome::Completed).await?;
                self.stats.write().await.tasks_completed += 1;

                info!(
                    worker_id = self.id,
                    task_id = %task.id,
                    attempt = task.attempt_number(),
                    status_code = response.status_code,
                    duration_ms = duration.as_millis(),
                    "webhook delivered successfully"
                );
                Ok(())
            },
            Err(error) if error.is_retryable() => {
                self.handle_retryable_failure(task, error, duration).await
            },
            Err(error) => self.fail_permanently(task, &error).await,
        }
    }

    async fn handle_retryable_failure(
        &self,
        task: &Task,
        error: DeliveryError,
        duration: Duration,
    ) -> Result<()> {
        match self.config.retry_policy.decide(task.retries, task.max_retries) {
            RetryDecision::Retry { delay } => {
                let retry_at = retry_time(self.clock.now_utc(), delay);
                let outcome = Outcome::Retry { message: error.to_string(), retry_at };
                self.record_outcome(task.id, &outcome).await?;
                self.stats.write().await.tasks_retried += 1;

                warn!(
                    worker_id = self.id,
                    task_id = %task.id,
                    attempt = task.attempt_number(),
                    duration_ms = duration.as_millis(),
                    retry_in_secs = delay.as_secs(),
                    next_retry_at = %retry_at,
                    error = %error,
                    category = %ErrorCategory::from(&error),
                    "delivery failed, retry scheduled"
                );
                Ok(())
            },
            RetryDecision::GiveUp { reason } => {
                debug!(worker_id = self.id, task_id = %task.id, reason = %reason, "giving up");
                let exhausted = DeliveryError::retries_exhausted(task.attempt_number(), &error);
                self.fail_permanently(task, &exhausted).await
            },
        }
    }

    async fn fail_permanently(&self, task: &Task, error: &DeliveryError) -> Result<()> {
        self.record_outcome(task.id, &Outcome::Failed { message: error.to_string() }).await?;
        self.stats.write().await.tasks_failed += 1;

        error!(
            worker_id = self.id,
            task_id = %task.id,
            attempt = task.attempt_number(),
            error = %error,
            category = %ErrorCategory::from(error),
            "delivery permanently failed"
        );
        Ok(())
    }

    /// Persists the outcome of a finished attempt, retrying storage failures
    /// after the idle interval until the store accepts it.
    ///
    /// Cancellation does not interrupt the retries: the attempt has already
    /// happened and its result must be recorded before the worker exits.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` only when the task is no longer
    /// `processing`, which no retry can change.
    async fn record_outcome(&self, task_id: TaskId, outcome: &Outcome) -> Result<()> {
        loop {
            let result = match outcome {
                Outcome::Completed => self.queue.complete(task_id).await,
                Outcome::Retry { message, retry_at } => {
                    self.queue.fail(task_id, message.clone(), Some(*retry_at)).await
                },
                Outcome::Failed { message } => {
                    self.queue.fail(task_id, message.clone(), None).await
                },
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e @ CoreError::InvalidTransition { .. }) => {
                    return Err(DeliveryError::storage(format!(
                        "failed to mark task {}: {e}",
                        outcome.as_str()
                    )));
                },
                Err(e) => {
                    self.stats.write().await.storage_errors += 1;
                    warn!(
                        worker_id = self.id,
                        task_id = %task_id,
                        outcome = outcome.as_str(),
                        error = %e,
                        retry_in_ms = self.config.poll_interval.as_millis(),
                        "failed to record delivery outcome, retrying"
                    );
                    self.clock.sleep(self.config.poll_interval).await;
                },
            }
        }
    }
}

/// Result of a finished attempt as it is written back to the queue.
enum Outcome {
    Completed,
    Retry { message: String, retry_at: DateTime<Utc> },
    Failed { message: String },
}

impl Outcome {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retry { .. } => "for retry",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Decodes and validates the stored payload.
fn decode_payload(task: &Task) -> Result<WebhookPayload> {
    let payload = task
        .webhook_payload()
        .map_err(|e| DeliveryError::invalid_payload(format!("undecodable payload: {e}")))?;
    payload.validate().map_err(|e| DeliveryError::invalid_payload(e.to_string()))?;
    Ok(payload)
}

/// `now + delay`, saturating at the largest representable instant.
fn retry_time(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use hookline_core::models::DEFAULT_MAX_RETRIES;
    use serde_json::json;

    use super::*;

    #[test]
    fn retry_time_saturates() {
        let now = Utc::now();

        assert_eq!(retry_time(now, Duration::from_secs(2)), now + chrono::Duration::seconds(2));
        assert_eq!(retry_time(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn undecodable_payload_is_invalid() {
        let payload = WebhookPayload {
            url: "https://example.com/hook".to_string(),
            event: "ping".to_string(),
            data: json!({ "a": 1 }),
            ..Default::default()
        };
        let mut task = Task::webhook(&payload, DEFAULT_MAX_RETRIES, Utc::now()).unwrap();
        assert!(decode_payload(&task).is_ok());

        task.payload = b"not json".to_vec();
        assert!(matches!(decode_payload(&task), Err(DeliveryError::InvalidPayload { .. })));
    }

    #[test]
    fn payload_failing_validation_is_invalid() {
        let payload = WebhookPayload {
            url: "ftp://example.com/hook".to_string(),
            event: "ping".to_string(),
            data: json!({ "a": 1 }),
            ..Default::default()
        };
        let task = Task::webhook(&payload, DEFAULT_MAX_RETRIES, Utc::now()).unwrap();

        let error = decode_payload(&task).unwrap_err();
        assert!(!error.is_retryable());
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = DeliveryConfig::default();

        assert_eq!(config.worker_count, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.client_config.timeout, Duration::from_secs(10));
        assert_eq!(config.stale_after, Some(Duration::from_secs(300)));
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, None);
    }
}
