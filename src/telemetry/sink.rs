//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Final disposition of one consumed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedOutcome {
    /// The task reached `COMPLETED`.
    Completed,
    /// The task reached `FAILED`.
    Failed,
    /// The event was a duplicate or referred to an unknown task.
    Skipped,
    /// The payload could not be decoded.
    Poisoned,
    /// The payload decoded but the store refused the event permanently.
    Rejected,
}

impl ProcessedOutcome {
    /// Label used by exporters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Poisoned => "poisoned",
            Self::Rejected => "rejected",
        }
    }
}

/// Receives pipeline counters.
pub trait MetricsSink: Send + Sync {
    /// A task was accepted and persisted.
    fn task_created(&self);
    /// A listing returned `count` tasks.
    fn tasks_listed(&self, count: usize);
    /// An event was durably published.
    fn event_published(&self);
    /// Publishing an event failed.
    fn publish_failed(&self);
    /// The reconciler published an event again for a stale task.
    fn event_republished(&self);
    /// A worker finished handling one delivery.
    fn task_processed(&self, outcome: ProcessedOutcome);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn task_created(&self) {}
    fn tasks_listed(&self, _count: usize) {}
    fn event_published(&self) {}
    fn publish_failed(&self) {}
    fn event_republished(&self) {}
    fn task_processed(&self, _outcome: ProcessedOutcome) {}
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Tasks created.
    pub tasks_created: u64,
    /// Tasks returned by listings.
    pub tasks_listed: u64,
    /// Events published.
    pub events_published: u64,
    /// Failed publishes.
    pub publish_errors: u64,
    /// Events published again by the reconciler.
    pub events_republished: u64,
    /// Deliveries that completed their task.
    pub processed_completed: u64,
    /// Deliveries that failed their task.
    pub processed_failed: u64,
    /// Deliveries skipped as duplicates or unknown.
    pub processed_skipped: u64,
    /// Undecodable deliveries.
    pub processed_poisoned: u64,
    /// Deliveries the store refused permanently.
    pub processed_rejected: u64,
}

/// Atomic counters, readable through [`InMemoryMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    tasks_created: AtomicU64,
    tasks_listed: AtomicU64,
    events_published: AtomicU64,
    publish_errors: AtomicU64,
    events_republished: AtomicU64,
    processed_completed: AtomicU64,
    processed_failed: AtomicU64,
    processed_skipped: AtomicU64,
    processed_poisoned: AtomicU64,
    processed_rejected: AtomicU64,
}

impl InMemoryMetrics {
    /// Creates a sink with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            tasks_created: read(&self.tasks_created),
            tasks_listed: read(&self.tasks_listed),
            events_published: read(&self.events_published),
            publish_errors: read(&self.publish_errors),
            events_republished: read(&self.events_republished),
            processed_completed: read(&self.processed_completed),
            processed_failed: read(&self.processed_failed),
            processed_skipped: read(&self.processed_skipped),
            processed_poisoned: read(&self.processed_poisoned),
            processed_rejected: read(&self.processed_rejected),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MetricsSink for InMemoryMetrics {
    fn task_created(&self) {
        bump(&self.tasks_created, 1);
    }

    fn tasks_listed(&self, count: usize) {
        bump(&self.tasks_listed, u64::try_from(count).unwrap_or(u64::MAX));
    }

    fn event_published(&self) {
        bump(&self.events_published, 1);
    }

    fn publish_failed(&self) {
        bump(&self.publish_errors, 1);
    }

    fn event_republished(&self) {
        bump(&self.events_republished, 1);
    }

    fn task_processed(&self, outcome: ProcessedOutcome) {
        let counter = match outcome {
            ProcessedOutcome::Completed => &self.processed_completed,
            ProcessedOutcome::Failed => &self.processed_failed,
            ProcessedOutcome::Skipped => &self.processed_skipped,
            ProcessedOutcome::Poisoned => &self.processed_poisoned,
            ProcessedOutcome::Rejected => &self.processed_rejected,
        };
        bump(counter, 1);
    }
}
