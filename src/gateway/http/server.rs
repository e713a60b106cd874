//! Router assembly and serving.

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use mockable::DefaultClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::interceptor::InterceptorChain;
use super::routes;
use crate::broker::ports::EventPublisher;
use crate::gateway::IngestionService;
use crate::task::ports::TaskStore;
use crate::telemetry::metrics_router;

/// Ingestion service over type-erased adapters, as held by the router.
pub type DynIngestionService = IngestionService<dyn TaskStore, dyn EventPublisher, DefaultClock>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    ingestion: Arc<DynIngestionService>,
    interceptors: Arc<InterceptorChain>,
    max_request_timeout: Duration,
    exporter: Option<PrometheusHandle>,
}

impl AppState {
    /// Bundles the service, the interceptors guarding `/api` and the upper
    /// bound on caller deadlines.
    #[must_use]
    pub fn new(
        ingestion: Arc<DynIngestionService>,
        interceptors: InterceptorChain,
        max_request_timeout: Duration,
    ) -> Self {
        Self {
            ingestion,
            interceptors: Arc::new(interceptors),
            max_request_timeout,
            exporter: None,
        }
    }

    /// Also serves `GET /metrics` from `handle`.
    #[must_use]
    pub fn with_metrics_endpoint(self, handle: PrometheusHandle) -> Self {
        Self {
            exporter: Some(handle),
            ..self
        }
    }

    pub(super) fn ingestion(&self) -> &DynIngestionService {
        &self.ingestion
    }

    pub(super) fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    pub(super) const fn max_request_timeout(&self) -> Duration {
        self.max_request_timeout
    }
}

/// Builds the gateway router.
///
/// `/api` routes run behind the interceptor chain; the health checks and
/// `/metrics` do not.
pub fn router(state: AppState) -> Router {
    let exporter = state.exporter.clone();
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/api/upload", post(routes::upload))
        .route("/api/tasks", get(routes::list_tasks))
        .with_state(state);
    exporter
        .into_iter()
        .fold(app, |routes, handle| routes.merge(metrics_router(handle)))
}

/// Serves `app` on `listener` until `shutdown` is cancelled, then lets
/// in-flight requests finish.
///
/// # Errors
///
/// Returns the I/O error that stopped the server.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "gateway listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
