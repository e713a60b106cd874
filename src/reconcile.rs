//! Republishes events for tasks stranded in `PENDING`.
//!
//! The gateway makes a single publish attempt after persisting a task. When
//! that attempt fails the task stays `PENDING` with no event behind it. The
//! reconciler sweeps for such tasks and publishes their event again; the
//! worker's conditional transitions make duplicate events harmless.

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::ports::EventPublisher;
use crate::task::domain::{TaskEvent, TaskStatus, TraceContext};
use crate::task::ports::{TaskStore, TaskStoreError, TaskStoreResult, TransitionOutcome};
use crate::telemetry::MetricsSink;

/// Sweep parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Age of `updated_at` after which a `PENDING` task counts as stranded.
    pub stale_after: Duration,
    /// Pause between sweeps.
    pub interval: Duration,
    /// Most tasks republished per sweep.
    pub batch: usize,
}

impl ReconcileSettings {
    /// Sweeps every quarter of `stale_after`, at least once a second.
    #[must_use]
    pub fn for_threshold(stale_after: Duration) -> Self {
        Self {
            stale_after,
            interval: stale_after.checked_div(4).unwrap_or_default().max(Duration::from_secs(1)),
            batch: 100,
        }
    }
}

/// Periodic sweep over stranded `PENDING` tasks.
pub struct PendingReconciler<S, P, C>
where
    S: TaskStore + ?Sized,
    P: EventPublisher + ?Sized,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    publisher: Arc<P>,
    clock: Arc<C>,
    metrics: Arc<dyn MetricsSink>,
    settings: ReconcileSettings,
}

impl<S, P, C> PendingReconciler<S, P, C>
where
    S: TaskStore + ?Sized,
    P: EventPublisher + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a reconciler.
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        publisher: Arc<P>,
        clock: Arc<C>,
        metrics: Arc<dyn MetricsSink>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            metrics,
            settings,
        }
    }

    /// Runs one sweep and returns how many events were published.
    ///
    /// Each candidate is first re-stamped through a conditional transition
    /// so concurrent sweeps in other processes skip it. The sweep stops at
    /// the first publish failure and leaves the rest for the next round.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Unavailable`] when the store fails.
    pub async fn reconcile_once(&self) -> TaskStoreResult<usize> {
        let cutoff = self.cutoff();
        let stranded = self
            .store
            .find_stale_pending(cutoff, self.settings.batch)
            .await?;
        let mut republished = 0usize;
        for task in stranded {
            let task_id = task.id();
            let mut stamped = task;
            stamped.touch(&*self.clock);
            let claimed = match self.store.transition(&stamped, TaskStatus::Pending).await {
                Ok(TransitionOutcome::Applied(claimed)) => claimed,
                Ok(TransitionOutcome::Stale(_)) | Err(TaskStoreError::NotFound(_)) => {
                    debug!(%task_id, "task moved on before republish");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let event = TaskEvent::for_task(&claimed, TraceContext::empty());
            match self.publisher.publish(&event).await {
                Ok(receipt) => {
                    self.metrics.event_republished();
                    republished = republished.saturating_add(1);
                    info!(
                        %task_id,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        "republished event for stranded task"
                    );
                }
                Err(err) => {
                    self.metrics.publish_failed();
                    warn!(%task_id, error = %err, "republish failed; retrying next sweep");
                    break;
                }
            }
        }
        Ok(republished)
    }

    /// Sweeps every `interval` until `shutdown` fires.
    pub async fn run(&self, shutdown: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            stale_after = ?self.settings.stale_after,
            interval = ?self.settings.interval,
            "pending reconciler started"
        );
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.reconcile_once().await {
                warn!(error = %err, "reconcile sweep failed");
            }
        }
        info!("pending reconciler stopped");
    }

    fn cutoff(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.settings.stale_after)
            .ok()
            .and_then(|age| self.clock.utc().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
