//! Repository for task database operations.
//!
//! Implements the claim protocol and the guarded status transitions of the
//! task state machine on top of PostgreSQL row locks.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{Task, TaskId, TaskStatus},
    time::Clock,
};

/// Repository for task database operations.
pub struct Repository {
    pool: Arc<PgPool>,
    clock: Arc<dyn Clock>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new task in `pending` with no retries.
    ///
    /// Status, retry count and `scheduled_at` are forced to their initial
    /// values regardless of what the caller put in `task`.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or violates a constraint.
    pub async fn create(&self, task: &Task) -> Result<TaskId> {
        let id: TaskId = sqlx::query_scalar(
            r"
            INSERT INTO tasks (
                id, type, payload, status, retries, max_retries,
                error, scheduled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, 'pending', 0, $4, NULL, $5, $5, $5)
            RETURNING id
            ",
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(&task.payload)
        .bind(task.max_retries)
        .bind(task.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Claims the oldest eligible pending task.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent claimers never block on
    /// each other and never receive the same row. A task is eligible when it
    /// is pending, still within its retry budget, and both `created_at` and
    /// `scheduled_at` have passed.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails.
    pub async fn claim(&self) -> Result<Option<Task>> {
        let now = self.clock.now_utc();

        let mut tx = self.pool.begin().await?;

        let task_id: Option<Uuid> = sqlx::query_scalar(
            r"
            SELECT id FROM tasks
            WHERE status = 'pending'
              AND retries <= max_retries
              AND created_at <= $1
              AND scheduled_at <= $1
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task_id) = task_id else {
            tx.rollback().await?;
            return Ok(None);
        };

        let task = sqlx::query_as::<_, Task>(
            r"
            UPDATE tasks
            SET status = 'processing', updated_at = $2
            WHERE id = $1
            RETURNING id, type, payload, status, retries, max_retries,
                      error, scheduled_at, created_at, updated_at
            ",
        )
        .bind(task_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(task))
    }

    /// Marks a processing task as completed and clears its error.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` if the task is not currently
    /// `processing`, or a database error if the update fails.
    pub async fn complete(&self, task_id: TaskId) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE tasks
            SET status = 'completed', error = NULL, updated_at = $2
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(task_id)
        .bind(self.clock.now_utc())
        .execute(&*self.pool)
        .await?;

        ensure_transitioned(result.rows_affected(), task_id)
    }

    /// Records a failed attempt on a processing task.
    ///
    /// With `retry_at` the task goes back to `pending`, its retry count grows
    /// by one and it becomes claimable again at `retry_at`. Without it the
    /// task enters the terminal `failed` state. The message is stored as the
    /// task's last error in both cases.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` if the task is not currently
    /// `processing` (or has no retries left when a retry is requested), or a
    /// database error if the update fails.
    pub async fn fail(
        &self,
        task_id: TaskId,
        message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = self.clock.now_utc();

        let rows_affected = match retry_at {
            Some(retry_at) => {
                self.schedule_retry_impl(&*self.pool, task_id, message, retry_at, now).await?
            },
            None => self.mark_failed_impl(&*self.pool, task_id, message, now).await?,
        };

        ensure_transitioned(rows_affected, task_id)
    }

    async fn schedule_retry_impl<'e, E>(
        &self,
        executor: E,
        task_id: TaskId,
        message: &str,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r"
            UPDATE tasks
            SET status = 'pending',
                retries = retries + 1,
                error = $2,
                scheduled_at = $3,
                updated_at = $4
            WHERE id = $1
              AND status = 'processing'
              AND retries < max_retries
            ",
        )
        .bind(task_id)
        .bind(message)
        .bind(retry_at)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_failed_impl<'e, E>(
        &self,
        executor: E,
        task_id: TaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r"
            UPDATE tasks
            SET status = 'failed', error = $2, updated_at = $3
            WHERE id = $1 AND status = 'processing'
            ",
        )
        .bind(task_id)
        .bind(message)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Returns tasks stuck in `processing` to `pending`.
    ///
    /// A claim is stale when the task has not been touched for `older_than`,
    /// which happens when the claiming process died or could not record the
    /// outcome. Retry counts are left alone.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let now = self.clock.now_utc();
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            return Ok(0);
        };

        let result = sqlx::query(
            r"
            UPDATE tasks
            SET status = 'pending', updated_at = $1
            WHERE status = 'processing' AND updated_at < $2
            ",
        )
        .bind(now)
        .bind(cutoff)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Finds a task by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, task_id: TaskId) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r"
            SELECT id, type, payload, status, retries, max_retries,
                   error, scheduled_at, created_at, updated_at
            FROM tasks
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(task)
    }
}

fn ensure_transitioned(rows_affected: u64, task_id: TaskId) -> Result<()> {
    if rows_affected == 0 {
        return Err(CoreError::InvalidTransition { task_id, expected: TaskStatus::Processing });
    }
    Ok(())
}
