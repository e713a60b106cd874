//! Store port for task persistence, lookup and conditional transitions.

use crate::task::domain::{OwnerId, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Result type for task store operations.
pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Lazy, finite sequence of tasks returned by owner queries.
pub type TaskStream = BoxStream<'static, TaskStoreResult<Task>>;

/// Outcome of a conditional status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The stored status matched the expectation and the task was written.
    Applied(Task),
    /// The stored status differed; nothing was written. Carries the current
    /// record.
    Stale(Task),
}

/// Task persistence contract.
///
/// Every write is a single-record atomic update. Implementations must be
/// safe for concurrent use and provide read-your-writes on a single key.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Conflict`] when the task ID already exists.
    async fn insert(&self, task: &Task) -> TaskStoreResult<()>;

    /// Overwrites status, result reference and `updated_at` of an existing
    /// task (last write wins).
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] when the task does not exist.
    async fn update(&self, task: &Task) -> TaskStoreResult<()>;

    /// Writes `task` only if the stored status still equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] when the task does not exist.
    async fn transition(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> TaskStoreResult<TransitionOutcome>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>>;

    /// Streams all tasks owned by `owner_id` in store-defined order.
    ///
    /// Each call starts a fresh pass over the matching records.
    fn query_by_owner(&self, owner_id: &OwnerId) -> TaskStream;

    /// Returns up to `limit` tasks still `PENDING` whose `updated_at` is
    /// older than `cutoff`.
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>>;

    /// Verifies the store is reachable.
    async fn ping(&self) -> TaskStoreResult<()>;
}

/// Errors returned by task store implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskStoreError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    Conflict(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The backing store could not be reached or failed.
    #[error("task store unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskStoreError {
    /// Wraps a persistence-layer error.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }
}
