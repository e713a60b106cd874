//! Per-event state machine.

use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::task::domain::{Task, TaskDomainError, TaskEvent, TaskId, TaskStatus};
use crate::task::ports::{TaskStore, TaskStoreError, TransitionOutcome};
use crate::worker::ports::TaskProcessor;

/// What handling one event did to its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The task was processed and is now `COMPLETED`.
    Completed(Task),
    /// Processing failed and the task is now `FAILED`.
    Failed(Task),
    /// The task was already terminal; nothing was written.
    AlreadyHandled(Task),
    /// The event referenced a task the store does not know.
    UnknownTask(TaskId),
}

/// Errors that stop handling before the task reached a terminal status.
#[derive(Debug, Clone, Error)]
pub enum HandleError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] TaskStoreError),

    /// The stored record does not admit the requested edge.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),
}

impl HandleError {
    /// Returns `true` when handling the same event again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Store(TaskStoreError::Unavailable(_)))
    }
}

/// Drives one task from `PENDING` to a terminal status.
///
/// Every write is a conditional transition against the status the handler
/// observed, so a redelivered event never regresses or re-finishes a task.
pub struct TaskHandler<S, P, C>
where
    S: TaskStore + ?Sized,
    P: TaskProcessor + ?Sized,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    processor: Arc<P>,
    clock: Arc<C>,
}

impl<S, P, C> TaskHandler<S, P, C>
where
    S: TaskStore + ?Sized,
    P: TaskProcessor + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a handler.
    #[must_use]
    pub const fn new(store: Arc<S>, processor: Arc<P>, clock: Arc<C>) -> Self {
        Self {
            store,
            processor,
            clock,
        }
    }

    /// Handles one event.
    ///
    /// A task found in `PROCESSING` is processed again: the previous
    /// holder of the delivery did not acknowledge it, so it never finished.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] when the store fails. The task is left in
    /// whatever status the last successful write gave it.
    pub async fn handle(&self, event: &TaskEvent) -> Result<HandleOutcome, HandleError> {
        let task_id = event.task_id();
        let Some(stored) = self.store.find_by_id(task_id).await? else {
            warn!(%task_id, "event references unknown task; dropping");
            return Ok(HandleOutcome::UnknownTask(task_id));
        };

        let processing = match stored.status() {
            TaskStatus::Pending => match self.claim(stored).await? {
                Claim::Claimed(task) => task,
                Claim::Settled(outcome) => return Ok(outcome),
            },
            TaskStatus::Processing => {
                info!(%task_id, "resuming task left in PROCESSING");
                stored
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                debug!(%task_id, status = %stored.status(), "task already terminal; skipping");
                return Ok(HandleOutcome::AlreadyHandled(stored));
            }
        };

        self.finish(processing).await
    }

    async fn claim(&self, pending: Task) -> Result<Claim, HandleError> {
        let task_id = pending.id();
        let mut next = pending;
        next.begin_processing(&*self.clock)?;
        match self.store.transition(&next, TaskStatus::Pending).await {
            Ok(TransitionOutcome::Applied(task)) => Ok(Claim::Claimed(task)),
            Ok(TransitionOutcome::Stale(current)) if current.status().is_terminal() => {
                Ok(Claim::Settled(HandleOutcome::AlreadyHandled(current)))
            }
            Ok(TransitionOutcome::Stale(current)) => Ok(Claim::Claimed(current)),
            Err(TaskStoreError::NotFound(_)) => Ok(Claim::Settled(HandleOutcome::UnknownTask(task_id))),
            Err(err) => Err(err.into()),
        }
    }

    async fn finish(&self, processing: Task) -> Result<HandleOutcome, HandleError> {
        let task_id = processing.id();
        let result = self
            .processor
            .process(task_id, processing.source_uri())
            .await;

        let mut next = processing;
        let succeeded = match result {
            Ok(result_uri) => {
                next.complete(result_uri, &*self.clock)?;
                true
            }
            Err(err) => {
                warn!(%task_id, error = %err, "processing failed");
                next.fail(&*self.clock)?;
                false
            }
        };

        match self.store.transition(&next, TaskStatus::Processing).await {
            Ok(TransitionOutcome::Applied(task)) if succeeded => {
                info!(%task_id, result_uri = ?task.result_uri(), "task completed");
                Ok(HandleOutcome::Completed(task))
            }
            Ok(TransitionOutcome::Applied(task)) => Ok(HandleOutcome::Failed(task)),
            Ok(TransitionOutcome::Stale(current)) => {
                debug!(%task_id, status = %current.status(), "task finished elsewhere");
                Ok(HandleOutcome::AlreadyHandled(current))
            }
            Err(TaskStoreError::NotFound(_)) => {
                warn!(%task_id, "task vanished during processing; dropping");
                Ok(HandleOutcome::UnknownTask(task_id))
            }
            Err(err) => Err(err.into()),
        }
    }
}

enum Claim {
    Claimed(Task),
    Settled(HandleOutcome),
}
