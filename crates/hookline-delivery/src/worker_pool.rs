//! Worker pool management with structured concurrency.
//!
//! Owns the delivery worker tasks and the stale-claim reaper, and provides
//! graceful shutdown: cancel, then wait for every task to finish its current
//! iteration.

use std::{sync::Arc, time::Duration};

use hookline_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::DeliveryClient,
    error::{DeliveryError, Result},
    queue::TaskQueue,
    worker::{DeliveryConfig, DeliveryWorker, EngineStats},
};

/// Worker pool that manages delivery worker tasks with supervision.
///
/// All workers share one cancellation token. Dropping a pool that still has
/// running workers cancels them; call `shutdown_graceful` to also wait for
/// in-flight deliveries.
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    reaper_handle: Option<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Create a new worker pool with the given configuration.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            config,
            client,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            reaper_handle: None,
            clock,
        }
    }

    /// Spawn all configured workers, and the reaper when enabled.
    ///
    /// Returns immediately after spawning. Workers run until the
    /// cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if `worker_count` is zero, if
    /// the stale threshold does not exceed the delivery timeout, or if the
    /// workers were already spawned.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        if self.config.worker_count == 0 {
            return Err(DeliveryError::configuration("worker_count must be at least 1"));
        }
        // A shorter threshold would requeue claims whose attempt is still running.
        if let Some(stale_after) = self.config.stale_after {
            let timeout = self.config.client_config.timeout;
            if stale_after <= timeout {
                return Err(DeliveryError::configuration(format!(
                    "stale_after ({}ms) must exceed the delivery timeout ({}ms)",
                    stale_after.as_millis(),
                    timeout.as_millis()
                )));
            }
        }
        if !self.worker_handles.is_empty() {
            return Err(DeliveryError::configuration("workers already spawned"));
        }

        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        self.stats.write().await.active_workers = self.config.worker_count;

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.queue.clone(),
                self.config.clone(),
                self.client.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(
                        worker_id,
                        error = %error,
                        "delivery worker terminated with error"
                    );
                } else {
                    debug!(worker_id, "delivery worker stopped gracefully");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        if let Some(stale_after) = self.config.stale_after {
            self.reaper_handle = Some(tokio::spawn(run_reaper(
                self.queue.clone(),
                stale_after,
                self.config.reaper_interval,
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            )));
        }

        info!(
            spawned_workers = self.worker_handles.len(),
            reaper = self.reaper_handle.is_some(),
            "all delivery workers spawned successfully"
        );

        Ok(())
    }

    /// Gracefully shut down all workers, waiting for in-flight deliveries to
    /// complete.
    ///
    /// Signals cancellation, then waits for every worker and the reaper. With
    /// `timeout` set the wait is bounded.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if the timeout is exceeded,
    /// or `DeliveryError::WorkerPanic` for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Option<Duration>) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout = ?timeout,
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let worker_handles = std::mem::take(&mut self.worker_handles);
        let reaper_handle = self.reaper_handle.take();
        let stats = self.stats.clone();

        let shutdown_future = async move {
            let mut first_panic = None;

            for (worker_id, handle) in worker_handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(
                            worker_id,
                            error = %error,
                            "worker completed with error during shutdown"
                        );
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                        first_panic.get_or_insert(DeliveryError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        });
                    },
                }
            }

            if let Some(handle) = reaper_handle {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "stale claim reaper panicked during shutdown");
                }
            }

            stats.write().await.active_workers = 0;

            first_panic.map_or(Ok(()), Err)
        };

        let result = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, shutdown_future).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    error!(
                        timeout_ms = timeout.as_millis(),
                        "worker shutdown timed out, some workers may still be running"
                    );
                    return Err(DeliveryError::ShutdownTimeout { timeout });
                },
            },
            None => shutdown_future.await,
        };

        info!("worker pool shutdown completed");
        result
    }

    /// Check if any workers are still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }

    /// Number of spawned worker tasks.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active_count,
                "worker pool dropped without graceful shutdown, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}

/// Periodically returns stale claims to the queue until cancelled.
async fn run_reaper(
    queue: Arc<dyn TaskQueue>,
    stale_after: Duration,
    interval: Duration,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
) {
    info!(
        stale_after_secs = stale_after.as_secs(),
        interval_secs = interval.as_secs(),
        "stale claim reaper started"
    );

    loop {
        tokio::select! {
            () = cancellation_token.cancelled() => break,
            () = clock.sleep(interval) => {
                match queue.requeue_stale(stale_after).await {
                    Ok(0) => debug!("no stale claims found"),
                    Ok(recovered) => {
                        stats.write().await.stale_recovered += recovered;
                        warn!(recovered, "returned stale claims to the queue");
                    },
                    Err(e) => {
                        stats.write().await.storage_errors += 1;
                        error!(error = %e, "stale claim scan failed");
                    },
                }
            }
        }
    }

    info!("stale claim reaper stopped");
}

#[cfg(test)]
mod tests {
    use hookline_core::time::RealClock;

    use super::*;
    use crate::{client::ClientConfig, queue::mock::InMemoryTaskQueue};

    fn create_test_pool(config: DeliveryConfig) -> (WorkerPool, Arc<RwLock<EngineStats>>) {
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        let queue = Arc::new(InMemoryTaskQueue::new(clock.clone()));
        let client = Arc::new(DeliveryClient::new(config.client_config.clone()).unwrap());
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        let pool = WorkerPool::new(
            queue,
            config,
            client,
            stats.clone(),
            CancellationToken::new(),
            clock,
        );
        (pool, stats)
    }

    fn fast_config(worker_count: usize) -> DeliveryConfig {
        DeliveryConfig {
            worker_count,
            poll_interval: Duration::from_millis(20),
            reaper_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn worker_pool_spawns_configured_number_of_workers() {
        let (mut pool, stats) = create_test_pool(fast_config(4));

        pool.spawn_workers().await.expect("workers should spawn successfully");

        assert_eq!(pool.worker_count(), 4);
        assert!(pool.reaper_handle.is_some());
        assert_eq!(stats.read().await.active_workers, 4);

        pool.shutdown_graceful(Some(Duration::from_secs(5)))
            .await
            .expect("graceful shutdown should succeed");
        assert_eq!(stats.read().await.active_workers, 0);
    }

    #[tokio::test]
    async fn zero_workers_rejected() {
        let (mut pool, _) = create_test_pool(fast_config(0));

        let result = pool.spawn_workers().await;
        assert!(matches!(result, Err(DeliveryError::Configuration { .. })));
    }

    #[tokio::test]
    async fn stale_threshold_must_exceed_delivery_timeout() {
        let config = DeliveryConfig {
            stale_after: Some(Duration::from_millis(100)),
            client_config: ClientConfig { timeout: Duration::from_millis(100), ..Default::default() },
            ..fast_config(2)
        };
        let (mut pool, stats) = create_test_pool(config);

        let result = pool.spawn_workers().await;

        assert!(matches!(result, Err(DeliveryError::Configuration { .. })), "got {result:?}");
        assert_eq!(pool.worker_count(), 0);
        assert!(pool.reaper_handle.is_none());
        assert_eq!(stats.read().await.active_workers, 0);
    }

    #[tokio::test]
    async fn reaper_disabled_without_stale_threshold() {
        let config = DeliveryConfig { stale_after: None, ..fast_config(1) };
        let (mut pool, _) = create_test_pool(config);

        pool.spawn_workers().await.unwrap();
        assert!(pool.reaper_handle.is_none());

        pool.shutdown_graceful(None).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_without_spawn_completes_immediately() {
        let (pool, _) = create_test_pool(fast_config(2));

        let result = pool.shutdown_graceful(Some(Duration::from_millis(1))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn drop_cancels_running_workers() {
        let (mut pool, _) = create_test_pool(fast_config(2));
        let token = pool.cancellation_token.clone();

        pool.spawn_workers().await.unwrap();
        assert!(pool.has_active_workers());
        drop(pool);

        assert!(token.is_cancelled(), "drop should have cancelled the token");
    }
}
