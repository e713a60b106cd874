//! Logging setup and the injected metrics sink.
//!
//! Counters are recorded through a [`MetricsSink`] handed to each component
//! rather than through process-wide state, so tests can observe exactly the
//! counts their own components produced. [`PrometheusMetrics`] keeps its
//! registry inside the sink and exposes it on `/metrics`.

mod logging;
mod prometheus;
mod sink;

pub use logging::{LogFormat, ParseLogFormatError, init_logging};
pub use prometheus::{PrometheusMetrics, metrics_router};
pub use sink::{InMemoryMetrics, MetricsSink, MetricsSnapshot, NoopMetrics, ProcessedOutcome};
