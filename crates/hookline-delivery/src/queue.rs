//! Task queue abstraction for the delivery engine.
//!
//! Workers, the reaper and the ingress API talk to the queue only through
//! `TaskQueue`. Production uses `PostgresTaskQueue`, backed by the repository
//! in `hookline_core::storage`; tests use the in-memory double from
//! [`mock`], which enforces the same claim rules and transition guards.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookline_core::{
    error::Result,
    models::{Task, TaskId},
    storage::Storage,
};

/// Durable task storage operations required by the delivery engine.
pub trait TaskQueue: Send + Sync + 'static {
    /// Persists a new task in `pending` with no retries, eligible at once.
    fn create(&self, task: Task) -> Pin<Box<dyn Future<Output = Result<TaskId>> + Send + '_>>;

    /// Atomically claims the oldest eligible pending task.
    ///
    /// Moves it to `processing` and returns it. Two concurrent claims never
    /// return the same task. `None` when nothing is eligible.
    fn claim(&self) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>>;

    /// Marks a processing task completed and clears its error.
    fn complete(&self, task_id: TaskId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a failed attempt.
    ///
    /// `Some(retry_at)` returns the task to `pending` with one more retry,
    /// claimable from `retry_at`. `None` fails it permanently.
    fn fail(
        &self,
        task_id: TaskId,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns claims untouched for `older_than` to `pending`, reporting how
    /// many were recovered.
    fn requeue_stale(
        &self,
        older_than: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Looks a task up by id.
    fn find(
        &self,
        task_id: TaskId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>>;

    /// Probes the backing store.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production queue on PostgreSQL.
pub struct PostgresTaskQueue {
    storage: Arc<Storage>,
}

impl PostgresTaskQueue {
    /// Creates a new PostgreSQL queue adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl TaskQueue for PostgresTaskQueue {
    fn create(&self, task: Task) -> Pin<Box<dyn Future<Output = Result<TaskId>> + Send + '_>> {
        Box::pin(async move { self.storage.tasks.create(&task).await })
    }

    fn claim(&self) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
        Box::pin(async move { self.storage.tasks.claim().await })
    }

    fn complete(&self, task_id: TaskId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.storage.tasks.complete(task_id).await })
    }

    fn fail(
        &self,
        task_id: TaskId,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.storage.tasks.fail(task_id, &message, retry_at).await })
    }

    fn requeue_stale(
        &self,
        older_than: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move { self.storage.tasks.requeue_stale(older_than).await })
    }

    fn find(
        &self,
        task_id: TaskId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
        Box::pin(async move { self.storage.tasks.find_by_id(task_id).await })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.storage.health_check().await })
    }
}

pub mod mock {
    //! In-memory task queue for testing.
    //!
    //! Keeps tasks in insertion order behind a single mutex so that claim is
    //! one select-and-update step, mirroring the row lock in PostgreSQL.
    //! Failures can be injected to exercise the worker's storage error
    //! handling.

    use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

    use chrono::{DateTime, Utc};
    use hookline_core::{
        error::{CoreError, Result},
        models::{Task, TaskId, TaskStatus},
        time::Clock,
    };
    use tokio::sync::Mutex;

    use super::TaskQueue;

    #[derive(Default)]
    struct State {
        tasks: Vec<Task>,
        claim_log: Vec<TaskId>,
        claim_error: Option<String>,
        resolve_error: Option<String>,
        unavailable: bool,
    }

    /// In-memory queue with the same semantics as the PostgreSQL one.
    pub struct InMemoryTaskQueue {
        state: Arc<Mutex<State>>,
        clock: Arc<dyn Clock>,
    }

    impl InMemoryTaskQueue {
        /// Creates an empty queue reading time from `clock`.
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self { state: Arc::new(Mutex::new(State::default())), clock }
        }

        /// Stores a task exactly as given, bypassing `create` defaults.
        pub async fn insert(&self, task: Task) {
            self.state.lock().await.tasks.push(task);
        }

        /// Returns a copy of every stored task in insertion order.
        pub async fn snapshot(&self) -> Vec<Task> {
            self.state.lock().await.tasks.clone()
        }

        /// Returns a copy of one stored task.
        pub async fn get(&self, task_id: TaskId) -> Option<Task> {
            self.state.lock().await.tasks.iter().find(|t| t.id == task_id).cloned()
        }

        /// Ids returned by successful claims, in claim order.
        pub async fn claim_log(&self) -> Vec<TaskId> {
            self.state.lock().await.claim_log.clone()
        }

        /// Makes the next `claim` fail with a database error.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            self.state.lock().await.claim_error = Some(error.into());
        }

        /// Makes the next `complete` or `fail` fail with a database error.
        pub async fn inject_resolve_error(&self, error: impl Into<String>) {
            self.state.lock().await.resolve_error = Some(error.into());
        }

        /// Makes `health_check` fail until reset.
        pub async fn set_unavailable(&self, unavailable: bool) {
            self.state.lock().await.unavailable = unavailable;
        }
    }

    fn is_claimable(task: &Task, now: DateTime<Utc>) -> bool {
        task.status == TaskStatus::Pending
            && task.retries <= task.max_retries
            && task.created_at <= now
            && task.scheduled_at <= now
    }

    fn processing_task(tasks: &mut [Task], task_id: TaskId) -> Result<&mut Task> {
        tasks
            .iter_mut()
            .find(|t| t.id == task_id && t.status == TaskStatus::Processing)
            .ok_or(CoreError::InvalidTransition { task_id, expected: TaskStatus::Processing })
    }

    impl TaskQueue for InMemoryTaskQueue {
        fn create(
            &self,
            task: Task,
        ) -> Pin<Box<dyn Future<Output = Result<TaskId>> + Send + '_>> {
            Box::pin(async move {
                let mut state = self.state.lock().await;
                if state.tasks.iter().any(|t| t.id == task.id) {
                    return Err(CoreError::Database(format!("duplicate task id {}", task.id)));
                }

                let task_id = task.id;
                state.tasks.push(Task {
                    status: TaskStatus::Pending,
                    retries: 0,
                    error: None,
                    scheduled_at: task.created_at,
                    updated_at: task.created_at,
                    ..task
                });
                Ok(task_id)
            })
        }

        fn claim(&self) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
            Box::pin(async move {
                let now = self.clock.now_utc();
                let mut state = self.state.lock().await;

                if let Some(error) = state.claim_error.take() {
                    return Err(CoreError::Database(error));
                }

                let oldest = state
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, task)| is_claimable(task, now))
                    .min_by_key(|(index, task)| (task.created_at, *index))
                    .map(|(index, _)| index);

                let Some(index) = oldest else {
                    return Ok(None);
                };

                let task = &mut state.tasks[index];
                task.status = TaskStatus::Processing;
                task.updated_at = now;
                let claimed = task.clone();

                state.claim_log.push(claimed.id);
                Ok(Some(claimed))
            })
        }

        fn complete(
            &self,
            task_id: TaskId,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let now = self.clock.now_utc();
                let mut state = self.state.lock().await;

                if let Some(error) = state.resolve_error.take() {
                    return Err(CoreError::Database(error));
                }

                let task = processing_task(&mut state.tasks, task_id)?;
                task.status = TaskStatus::Completed;
                task.error = None;
                task.updated_at = now;
                Ok(())
            })
        }

        fn fail(
            &self,
            task_id: TaskId,
            message: String,
            retry_at: Option<DateTime<Utc>>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let now = self.clock.now_utc();
                let mut state = self.state.lock().await;

                if let Some(error) = state.resolve_error.take() {
                    return Err(CoreError::Database(error));
                }

                let task = processing_task(&mut state.tasks, task_id)?;
                match retry_at {
                    Some(retry_at) => {
                        if task.retries >= task.max_retries {
                            return Err(CoreError::InvalidTransition {
                                task_id,
                                expected: TaskStatus::Processing,
                            });
                        }
                        task.status = TaskStatus::Pending;
                        task.retries += 1;
                        task.scheduled_at = retry_at;
                    },
                    None => task.status = TaskStatus::Failed,
                }
                task.error = Some(message);
                task.updated_at = now;
                Ok(())
            })
        }

        fn requeue_stale(
            &self,
            older_than: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
            Box::pin(async move {
                let now = self.clock.now_utc();
                let Some(cutoff) = chrono::Duration::from_std(older_than)
                    .ok()
                    .and_then(|threshold| now.checked_sub_signed(threshold))
                else {
                    return Ok(0);
                };

                let mut state = self.state.lock().await;
                let mut recovered = 0;
                for task in &mut state.tasks {
                    if task.status == TaskStatus::Processing && task.updated_at < cutoff {
                        task.status = TaskStatus::Pending;
                        task.updated_at = now;
                        recovered += 1;
                    }
                }
                Ok(recovered)
            })
        }

        fn find(
            &self,
            task_id: TaskId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
            Box::pin(async move { Ok(self.get(task_id).await) })
        }

        fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                if self.state.lock().await.unavailable {
                    return Err(CoreError::Database("in-memory queue marked unavailable".into()));
                }
                Ok(())
            })
        }
    }

}
