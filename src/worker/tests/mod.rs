//! Unit tests for the worker module.


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::task::domain::{OwnerId, ResultUri, SourceUri, Task, TaskId, TaskStatus};
use crate::task::ports::{TaskStore, TaskStoreResult, TaskStream, TransitionOutcome};
use crate::worker::adapters::SimulatedProcessor;
use crate::worker::ports::{ProcessingError, TaskProcessor};

pub(super) const RESULT_BASE: &str = "https://cdn.test/processed";

mock! {
    pub(super) Store {}

    #[async_trait]
    impl TaskStore for Store {
        async fn insert(&self, task: &Task) -> TaskStoreResult<()>;
        async fn update(&self, task: &Task) -> TaskStoreResult<()>;
        async fn transition(
            &self,
            task: &Task,
            expected: TaskStatus,
        ) -> TaskStoreResult<TransitionOutcome>;
        async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>>;
        fn query_by_owner(&self, owner_id: &OwnerId) -> TaskStream;
        async fn find_stale_pending(
            &self,
            cutoff: DateTime<Utc>,
            limit: usize,
        ) -> TaskStoreResult<Vec<Task>>;
        async fn ping(&self) -> TaskStoreResult<()>;
    }
}

/// Processor that counts calls and fails sources containing `fail`.
#[derive(Debug)]
pub(super) struct CountingProcessor {
    inner: SimulatedProcessor,
    calls: AtomicUsize,
}

impl CountingProcessor {
    pub(super) fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Processor that takes `delay` per task.
    pub(super) fn with_delay(delay: Duration) -> Self {
        Self {
            inner: SimulatedProcessor::new(delay, RESULT_BASE),
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskProcessor for CountingProcessor {
    async fn process(
        &self,
        task_id: TaskId,
        source_uri: &SourceUri,
    ) -> Result<ResultUri, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source_uri.as_str().contains("fail") {
            return Err(ProcessingError("corrupt image".to_owned()));
        }
        self.inner.process(task_id, source_uri).await
    }
}
