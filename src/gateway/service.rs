//! Submit and list orchestration.

use crate::auth::domain::Principal;
use crate::broker::ports::{BrokerError, EventPublisher};
use crate::task::{
    domain::{SourceUri, Task, TaskDomainError, TaskEvent, TraceContext},
    ports::{TaskStore, TaskStoreError},
};
use crate::telemetry::MetricsSink;
use futures::TryStreamExt;
use mockable::Clock;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Errors returned by [`IngestionService`].
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The submitted values failed validation.
    #[error(transparent)]
    Validation(#[from] TaskDomainError),

    /// The task store failed; nothing was created.
    #[error(transparent)]
    Store(#[from] TaskStoreError),

    /// The task was stored but its event could not be published. The task
    /// stays `PENDING` until reconciliation republishes it.
    #[error("task {} stored but not published: {source}", .task.id())]
    PublishFailed {
        /// The persisted task.
        task: Box<Task>,
        /// Broker failure.
        source: BrokerError,
    },

    /// The caller's deadline expired.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// A task submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    source_uri: String,
    trace: TraceContext,
    deadline: Option<Instant>,
}

impl SubmitRequest {
    /// Creates a submission for `source_uri`.
    #[must_use]
    pub fn new(source_uri: impl Into<String>) -> Self {
        Self {
            source_uri: source_uri.into(),
            trace: TraceContext::empty(),
            deadline: None,
        }
    }

    /// Propagates the caller's trace context to the published event.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    /// Bounds store and broker calls by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Task ingestion service.
pub struct IngestionService<S, P, C>
where
    S: TaskStore + ?Sized,
    P: EventPublisher + ?Sized,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    publisher: Arc<P>,
    clock: Arc<C>,
    metrics: Arc<dyn MetricsSink>,
}

impl<S, P, C> IngestionService<S, P, C>
where
    S: TaskStore + ?Sized,
    P: EventPublisher + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a service from its collaborators.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        publisher: Arc<P>,
        clock: Arc<C>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            metrics,
        }
    }

    /// Records a new `PENDING` task for `principal` and publishes its event.
    ///
    /// # Errors
    ///
    /// Returns [`IngestionError::Validation`] for a blank source reference,
    /// [`IngestionError::Store`] if the insert fails,
    /// [`IngestionError::PublishFailed`] if the task was stored but the
    /// broker did not accept the event, or
    /// [`IngestionError::DeadlineExceeded`] when the caller's deadline
    /// expires first.
    pub async fn submit(
        &self,
        principal: &Principal,
        request: SubmitRequest,
    ) -> IngestionResult<Task> {
        let source_uri = SourceUri::new(request.source_uri)?;
        let task = Task::new(principal.owner_id().clone(), source_uri, &*self.clock);

        bounded(request.deadline, async {
            self.store.insert(&task).await.map_err(IngestionError::from)
        })
        .await?;
        self.metrics.task_created();
        tracing::info!(task_id = %task.id(), owner_id = %task.owner_id(), "task stored");

        let event = TaskEvent::for_task(&task, request.trace);
        let published = bounded(request.deadline, async {
            self.publisher
                .publish(&event)
                .await
                .map_err(|source| IngestionError::PublishFailed {
                    task: Box::new(task.clone()),
                    source,
                })
        })
        .await;

        match published {
            Ok(receipt) => {
                self.metrics.event_published();
                tracing::info!(
                    task_id = %task.id(),
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "task event published"
                );
                Ok(task)
            }
            Err(err) => {
                self.metrics.publish_failed();
                tracing::error!(
                    task_id = %task.id(),
                    error = %err,
                    "task left pending without an event; awaiting reconciliation"
                );
                Err(err)
            }
        }
    }

    /// Returns every task owned by `principal`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestionError::Store`] if the query fails, or
    /// [`IngestionError::DeadlineExceeded`] when `deadline` expires first.
    pub async fn list(
        &self,
        principal: &Principal,
        deadline: Option<Instant>,
    ) -> IngestionResult<Vec<Task>> {
        let tasks: Vec<Task> = bounded(deadline, async {
            self.store
                .query_by_owner(principal.owner_id())
                .try_collect()
                .await
                .map_err(IngestionError::from)
        })
        .await?;
        self.metrics.tasks_listed(tasks.len());
        Ok(tasks)
    }

    /// Checks that the task store answers.
    ///
    /// # Errors
    ///
    /// Returns [`IngestionError::Store`] when it does not.
    pub async fn ready(&self) -> IngestionResult<()> {
        self.store.ping().await.map_err(IngestionError::from)
    }
}

async fn bounded<T, F>(deadline: Option<Instant>, work: F) -> IngestionResult<T>
where
    F: Future<Output = IngestionResult<T>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, work)
            .await
            .map_err(|_| IngestionError::DeadlineExceeded)?,
        None => work.await,
    }
}
