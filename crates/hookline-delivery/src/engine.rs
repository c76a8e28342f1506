//! Webhook delivery engine.
//!
//! The engine ties the queue, the HTTP client and the worker pool together
//! behind a start/shutdown lifecycle.
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ DeliveryEngine │──▶│ Worker Pool  │──▶│ HTTP Client │
//! └────────────────┘   └──────────────┘   └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌──────────────┐   ┌─────────────┐
//!                     │  TaskQueue   │   │ Recipients  │
//!                     └──────────────┘   └─────────────┘
//! ```

use std::sync::Arc;

use hookline_core::Clock;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    client::DeliveryClient,
    error::Result,
    queue::TaskQueue,
    worker::{DeliveryConfig, DeliveryWorker, EngineStats},
    worker_pool::WorkerPool,
};

/// Main delivery engine coordinating webhook delivery workers.
pub struct DeliveryEngine {
    queue: Arc<dyn TaskQueue>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates a new delivery engine with its own cancellation token.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery client cannot be initialized.
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::with_cancellation_token(queue, config, clock, CancellationToken::new())
    }

    /// Creates a new delivery engine driven by an existing token.
    ///
    /// Lets the process share one token between the engine and other
    /// components such as the ingress server.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery client cannot be initialized.
    pub fn with_cancellation_token(
        queue: Arc<dyn TaskQueue>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);
        let stats = Arc::new(RwLock::new(EngineStats::default()));

        Ok(Self {
            queue,
            config,
            client,
            stats,
            cancellation_token,
            worker_pool: None,
            clock,
        })
    }

    /// Token that stops the engine when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Starts the delivery engine with configured worker pool.
    ///
    /// Returns immediately after spawning workers. Use `shutdown()` to stop
    /// gracefully, or drop the engine to cancel workers immediately.
    ///
    /// # Errors
    ///
    /// Returns error if worker pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "starting webhook delivery engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.queue.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        info!("delivery engine started successfully");
        Ok(())
    }

    /// Gracefully shuts down the delivery engine.
    ///
    /// Signals all workers to stop claiming and waits until every in-flight
    /// delivery has finished and recorded its outcome, bounded by the
    /// configured shutdown timeout if one is set.
    ///
    /// # Errors
    ///
    /// Returns error if graceful shutdown times out or a worker panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");
        self.cancellation_token.cancel();

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        } else {
            info!("delivery engine was not started, shutdown completed immediately");
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Claims and processes at most one task on the calling task.
    ///
    /// Runs the same code path as a pool worker without spawning anything,
    /// which makes it suitable for deterministic tests and manual draining.
    /// Returns whether a task was processed.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` if a queue operation fails.
    pub async fn process_next(&self) -> Result<bool> {
        let worker = DeliveryWorker::new(
            0,
            self.queue.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker.process_next().await
    }
}
