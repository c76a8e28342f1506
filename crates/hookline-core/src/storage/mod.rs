//! Database access layer for task persistence.
//!
//! All SQL touching the `tasks` table lives in this module. The delivery
//! engine reaches it only through the repository, so the claim protocol and
//! the state machine guards are enforced in one place.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::debug;

pub mod tasks;

use crate::{error::Result, time::Clock};

/// Entry point for all database operations.
///
/// Owns the shared connection pool and hands out repositories built on it.
#[derive(Clone)]
pub struct Storage {
    /// Repository for task operations.
    pub tasks: Arc<tasks::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        let pool = Arc::new(pool);

        Self { tasks: Arc::new(tasks::Repository::new(pool, clock)) }
    }

    /// Creates the `tasks` table and its indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.tasks.pool();

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                type TEXT NOT NULL,
                payload BYTEA NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
                retries INTEGER NOT NULL DEFAULT 0 CHECK (retries >= 0),
                max_retries INTEGER NOT NULL CHECK (max_retries >= 0),
                error TEXT,
                scheduled_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CHECK (retries <= max_retries)
            )
            ",
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_tasks_claimable
            ON tasks (status, scheduled_at, created_at)
            ",
        )
        .execute(&*pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_tasks_processing
            ON tasks (updated_at)
            WHERE status = 'processing'
            ",
        )
        .execute(&*pool)
        .await?;

        debug!("task schema is up to date");
        Ok(())
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.tasks.pool()).await?;

        Ok(())
    }
}
