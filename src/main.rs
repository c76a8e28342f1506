//! Hookline webhook dispatch service.
//!
//! Main entry point. Loads configuration, connects to PostgreSQL, starts the
//! delivery engine next to the ingress API, and coordinates graceful
//! shutdown of both.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookline_api::{server::shutdown_signal, start_server, AppState, Config};
use hookline_core::{storage::Storage, time::RealClock, Clock};
use hookline_delivery::{
    queue::{PostgresTaskQueue, TaskQueue},
    DeliveryEngine,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!("starting hookline webhook dispatch service");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        worker_count = config.worker_count,
        max_connections = config.database_max_connections,
        "configuration loaded"
    );

    let server_addr = config.parse_server_addr()?;
    let db_pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(db_pool.clone(), clock.clone()));
    storage.migrate().await.context("failed to run database migrations")?;
    info!("database migrations completed");

    let queue: Arc<dyn TaskQueue> = Arc::new(PostgresTaskQueue::new(storage));
    let shutdown = CancellationToken::new();

    let mut engine = DeliveryEngine::with_cancellation_token(
        queue.clone(),
        config.to_delivery_config(),
        clock.clone(),
        shutdown.clone(),
    )
    .context("failed to create delivery engine")?;
    engine.start().await.context("failed to start delivery engine")?;

    let state = AppState::new(queue, clock)
        .with_default_max_retries(config.default_max_retries)
        .with_request_timeout(config.request_timeout());

    let mut server_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = start_server(state, server_addr, shutdown.clone()).await {
                error!(error = %e, "server failed");
                shutdown.cancel();
            }
        }
    });

    info!(addr = %server_addr, "hookline is ready to accept tasks");

    tokio::select! {
        () = shutdown_signal() => {},
        () = shutdown.cancelled() => warn!("component failure, shutting down"),
    }
    shutdown.cancel();

    // In-flight requests get a bounded window to finish.
    tokio::select! {
        _ = tokio::time::sleep(config.server_grace_period()) => {
            warn!("server grace period expired");
            server_handle.abort();
        }
        _ = &mut server_handle => {
            info!("server stopped");
        }
    }

    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine did not shut down cleanly");
    } else {
        info!("delivery engine stopped");
    }

    db_pool.close().await;
    info!("database connections closed");

    info!("hookline shutdown complete");
    Ok(())
}

/// Initializes tracing from `RUST_LOG`, falling back to the configured
/// filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool, retrying while PostgreSQL comes up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if attempt < config.database_connect_attempts => {
                warn!(
                    attempt,
                    max_attempts = config.database_connect_attempts,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database connection pool after retries");
            },
        }
    }
}
