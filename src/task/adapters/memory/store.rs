//! Thread-safe in-memory task store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::task::{
    domain::{OwnerId, Task, TaskId, TaskStatus},
    ports::{TaskStore, TaskStoreError, TaskStoreResult, TaskStream, TransitionOutcome},
};

/// Thread-safe in-memory task store.
///
/// Owner queries return tasks in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<InMemoryTaskState>>,
}

#[derive(Debug, Default)]
struct InMemoryTaskState {
    tasks: HashMap<TaskId, Task>,
    insertion_order: Vec<TaskId>,
}

impl InMemoryTaskStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Unavailable`] if the lock is poisoned.
    pub fn len(&self) -> TaskStoreResult<usize> {
        Ok(self.read()?.tasks.len())
    }

    /// Returns `true` when no tasks are stored.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Unavailable`] if the lock is poisoned.
    pub fn is_empty(&self) -> TaskStoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> TaskStoreResult<RwLockReadGuard<'_, InMemoryTaskState>> {
        self.state
            .read()
            .map_err(|err| TaskStoreError::unavailable(std::io::Error::other(err.to_string())))
    }

    fn write(&self) -> TaskStoreResult<RwLockWriteGuard<'_, InMemoryTaskState>> {
        self.state
            .write()
            .map_err(|err| TaskStoreError::unavailable(std::io::Error::other(err.to_string())))
    }
}

/// Copies the mutable lifecycle fields of `incoming` over `stored`.
///
/// Identity, owner, source and creation time are never rewritten.
fn apply_mutation(stored: &Task, incoming: &Task) -> Task {
    Task::from_persisted(crate::task::domain::PersistedTaskData {
        id: stored.id(),
        owner_id: stored.owner_id().clone(),
        source_uri: stored.source_uri().clone(),
        result_uri: incoming.result_uri().cloned(),
        status: incoming.status(),
        created_at: stored.created_at(),
        updated_at: incoming.updated_at(),
    })
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> TaskStoreResult<()> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&task.id()) {
            return Err(TaskStoreError::Conflict(task.id()));
        }
        state.insertion_order.push(task.id());
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> TaskStoreResult<()> {
        let mut state = self.write()?;
        let stored = state
            .tasks
            .get(&task.id())
            .ok_or(TaskStoreError::NotFound(task.id()))?;
        let updated = apply_mutation(stored, task);
        state.tasks.insert(task.id(), updated);
        Ok(())
    }

    async fn transition(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> TaskStoreResult<TransitionOutcome> {
        let mut state = self.write()?;
        let stored = state
            .tasks
            .get(&task.id())
            .ok_or(TaskStoreError::NotFound(task.id()))?;
        if stored.status() != expected {
            return Ok(TransitionOutcome::Stale(stored.clone()));
        }
        let updated = apply_mutation(stored, task);
        state.tasks.insert(task.id(), updated.clone());
        Ok(TransitionOutcome::Applied(updated))
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        let state = self.read()?;
        Ok(state.tasks.get(&id).cloned())
    }

    fn query_by_owner(&self, owner_id: &OwnerId) -> TaskStream {
        let snapshot: TaskStoreResult<Vec<Task>> = self.read().map(|state| {
            state
                .insertion_order
                .iter()
                .filter_map(|id| state.tasks.get(id))
                .filter(|task| task.owner_id() == owner_id)
                .cloned()
                .collect()
        });
        match snapshot {
            Ok(tasks) => Box::pin(stream::iter(tasks.into_iter().map(Ok))),
            Err(err) => Box::pin(stream::once(async move { Err(err) })),
        }
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> TaskStoreResult<Vec<Task>> {
        let state = self.read()?;
        Ok(state
            .insertion_order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| task.status() == TaskStatus::Pending && task.updated_at() < cutoff)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> TaskStoreResult<()> {
        self.read().map(|_| ())
    }
}
