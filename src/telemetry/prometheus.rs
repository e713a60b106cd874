//! Prometheus export of the pipeline counters.

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use metrics::{counter, describe_counter, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use super::{MetricsSink, ProcessedOutcome};

/// Tasks accepted and persisted.
pub const TASKS_CREATED: &str = "pixelflow_tasks_created_total";
/// Tasks returned by owner listings.
pub const TASKS_LISTED: &str = "pixelflow_tasks_listed_total";
/// Events durably published.
pub const EVENTS_PUBLISHED: &str = "pixelflow_events_published_total";
/// Failed publishes.
pub const PUBLISH_ERRORS: &str = "pixelflow_publish_errors_total";
/// Events published again by the reconciler.
pub const EVENTS_REPUBLISHED: &str = "pixelflow_events_republished_total";
/// Handled deliveries, labelled by `outcome`.
pub const TASKS_PROCESSED: &str = "pixelflow_tasks_processed_total";

/// [`MetricsSink`] backed by a Prometheus registry owned by the sink.
///
/// The recorder is never installed as the global `metrics` recorder; every
/// update runs under [`with_local_recorder`].
pub struct PrometheusMetrics {
    recorder: PrometheusRecorder,
}

impl PrometheusMetrics {
    /// Creates a sink with an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        with_local_recorder(&recorder, || {
            describe_counter!(TASKS_CREATED, "Tasks accepted and persisted");
            describe_counter!(TASKS_LISTED, "Tasks returned by owner listings");
            describe_counter!(EVENTS_PUBLISHED, "Task events durably published");
            describe_counter!(PUBLISH_ERRORS, "Task events that could not be published");
            describe_counter!(EVENTS_REPUBLISHED, "Task events republished for stale tasks");
            describe_counter!(TASKS_PROCESSED, "Deliveries handled by workers, by outcome");
        });
        Self { recorder }
    }

    /// Returns a handle rendering the registry.
    #[must_use]
    pub fn handle(&self) -> PrometheusHandle {
        self.recorder.handle()
    }

    fn record(&self, update: impl FnOnce()) {
        with_local_recorder(&self.recorder, update);
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn task_created(&self) {
        self.record(|| counter!(TASKS_CREATED).increment(1));
    }

    fn tasks_listed(&self, count: usize) {
        let listed = u64::try_from(count).unwrap_or(u64::MAX);
        self.record(|| counter!(TASKS_LISTED).increment(listed));
    }

    fn event_published(&self) {
        self.record(|| counter!(EVENTS_PUBLISHED).increment(1));
    }

    fn publish_failed(&self) {
        self.record(|| counter!(PUBLISH_ERRORS).increment(1));
    }

    fn event_republished(&self) {
        self.record(|| counter!(EVENTS_REPUBLISHED).increment(1));
    }

    fn task_processed(&self, outcome: ProcessedOutcome) {
        self.record(|| counter!(TASKS_PROCESSED, "outcome" => outcome.as_str()).increment(1));
    }
}

/// Router serving `GET /metrics` in the Prometheus text format.
#[must_use]
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
