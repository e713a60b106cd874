//! Receive, handle and acknowledge loop for one consumer-group member.

use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{ExponentialBackoff, HandleOutcome, TaskHandler};
use crate::broker::domain::Delivery;
use crate::broker::ports::{BrokerError, EventConsumer};
use crate::task::ports::TaskStore;
use crate::telemetry::{MetricsSink, ProcessedOutcome};
use crate::worker::ports::TaskProcessor;

/// Timing knobs for [`ConsumeLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Longest single wait for a delivery.
    pub receive_wait: Duration,
    /// First retry delay after a transient failure.
    pub backoff_base: Duration,
    /// Largest retry delay.
    pub backoff_cap: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            receive_wait: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

/// One member's consume loop.
///
/// A delivery is acknowledged only after its handler returned. Transient
/// failures of the broker or the store are retried with capped, jittered
/// backoff for as long as the loop is not cancelled; a delivery whose
/// handling was interrupted by shutdown stays unacknowledged and is
/// redelivered to another member.
pub struct ConsumeLoop<S, P, C>
where
    S: TaskStore + ?Sized,
    P: TaskProcessor + ?Sized,
    C: Clock + Send + Sync,
{
    name: String,
    consumer: Arc<dyn EventConsumer>,
    handler: Arc<TaskHandler<S, P, C>>,
    metrics: Arc<dyn MetricsSink>,
    settings: LoopSettings,
}

impl<S, P, C> ConsumeLoop<S, P, C>
where
    S: TaskStore + ?Sized,
    P: TaskProcessor + ?Sized,
    C: Clock + Send + Sync,
{
    /// Creates a loop named `name` for log output.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        consumer: Arc<dyn EventConsumer>,
        handler: Arc<TaskHandler<S, P, C>>,
        metrics: Arc<dyn MetricsSink>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            name: name.into(),
            consumer,
            handler,
            metrics,
            settings,
        }
    }

    /// Runs until `shutdown` fires or the consumer is closed, then leaves
    /// the consumer group.
    ///
    /// A handler already running when `shutdown` fires is allowed to
    /// finish and its delivery is acknowledged.
    pub async fn run(self, shutdown: &CancellationToken) {
        info!(worker = %self.name, "consume loop started");
        let mut backoff = self.backoff();
        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = self.consumer.receive(self.settings.receive_wait) => received,
            };
            match received {
                Ok(None) => backoff.reset(),
                Ok(Some(delivery)) => {
                    backoff.reset();
                    self.dispatch(&delivery, shutdown).await;
                }
                Err(BrokerError::Closed) => break,
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        worker = %self.name,
                        error = %err,
                        attempt = backoff.attempt(),
                        delay = ?delay,
                        "broker read failed; backing off"
                    );
                    if !pause(delay, shutdown).await {
                        break;
                    }
                }
            }
        }

        if let Err(err) = self.consumer.close().await {
            warn!(worker = %self.name, error = %err, "failed to leave consumer group");
        }
        info!(worker = %self.name, "consume loop stopped");
    }

    async fn dispatch(&self, delivery: &Delivery, shutdown: &CancellationToken) {
        let event = match delivery.event() {
            Ok(event) => event,
            Err(err) => {
                error!(
                    worker = %self.name,
                    partition = delivery.partition(),
                    offset = delivery.offset(),
                    error = %err,
                    "skipping undecodable message"
                );
                self.metrics.task_processed(ProcessedOutcome::Poisoned);
                self.acknowledge(delivery).await;
                return;
            }
        };

        let span = info_span!(
            "handle_event",
            worker = %self.name,
            task_id = %event.task_id(),
            partition = delivery.partition(),
            offset = delivery.offset(),
            traceparent = event.trace().traceparent().unwrap_or_default(),
        );
        let mut backoff = self.backoff();
        let outcome = loop {
            match self.handler.handle(event).instrument(span.clone()).await {
                Ok(handled) => break Some(handled),
                Err(err) if err.is_transient() => {
                    let delay = backoff.next_delay();
                    span.in_scope(|| {
                        warn!(error = %err, delay = ?delay, "task store failed; retrying");
                    });
                    if !pause(delay, shutdown).await {
                        span.in_scope(|| info!("shutdown during retry; leaving delivery unacknowledged"));
                        return;
                    }
                }
                Err(err) => {
                    span.in_scope(|| error!(error = %err, "dropping event that cannot be applied"));
                    break None;
                }
            }
        };

        self.metrics
            .task_processed(outcome.as_ref().map_or(ProcessedOutcome::Rejected, processed_outcome));
        self.acknowledge(delivery).await;
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        match self.consumer.ack(delivery).await {
            Ok(()) => debug!(
                worker = %self.name,
                partition = delivery.partition(),
                offset = delivery.offset(),
                "delivery acknowledged"
            ),
            Err(BrokerError::Revoked { partition }) => warn!(
                worker = %self.name,
                partition,
                offset = delivery.offset(),
                "partition reassigned before acknowledgement; delivery will repeat"
            ),
            Err(err) => warn!(
                worker = %self.name,
                partition = delivery.partition(),
                offset = delivery.offset(),
                error = %err,
                "acknowledgement failed; delivery will repeat"
            ),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.settings.backoff_base, self.settings.backoff_cap)
    }
}

const fn processed_outcome(outcome: &HandleOutcome) -> ProcessedOutcome {
    match outcome {
        HandleOutcome::Completed(_) => ProcessedOutcome::Completed,
        HandleOutcome::Failed(_) => ProcessedOutcome::Failed,
        HandleOutcome::AlreadyHandled(_) | HandleOutcome::UnknownTask(_) => {
            ProcessedOutcome::Skipped
        }
    }
}

/// Sleeps for `delay`. Returns `false` if `shutdown` fired first.
async fn pause(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
