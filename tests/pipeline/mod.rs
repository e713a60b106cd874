//! In-process gateway wiring shared by the integration suites.
//!
//! Everything runs on in-memory adapters: the router is driven through
//! `tower::ServiceExt::oneshot` and tokens are resolved by a static gate.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use mockable::DefaultClock;
use pixelflow::auth::adapters::StaticAuthGate;
use pixelflow::auth::domain::Principal;
use pixelflow::broker::adapters::memory::InMemoryBroker;
use pixelflow::broker::ports::EventPublisher;
use pixelflow::gateway::IngestionService;
use pixelflow::gateway::http::{
    AppState, BearerAuthInterceptor, InterceptorChain, RequestIdInterceptor, router,
};
use pixelflow::task::adapters::memory::InMemoryTaskStore;
use pixelflow::task::ports::TaskStore;
use pixelflow::telemetry::{InMemoryMetrics, MetricsSink, PrometheusMetrics};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const TOPIC: &str = "image-tasks";
pub const GROUP: &str = "worker-group-1";
pub const PARTITIONS: u32 = 4;

/// Token accepted for user `u1`.
pub const TOKEN_U1: &str = "token-u1";
/// Token accepted for user `u2`.
pub const TOKEN_U2: &str = "token-u2";

/// Gateway router plus handles on the adapters behind it.
pub struct Gateway {
    pub app: Router,
    pub store: Arc<InMemoryTaskStore>,
    pub broker: InMemoryBroker,
    pub metrics: Arc<InMemoryMetrics>,
}

impl Gateway {
    pub fn new() -> eyre::Result<Self> {
        Self::with_max_timeout(Duration::from_secs(5))
    }

    pub fn with_max_timeout(max_request_timeout: Duration) -> eyre::Result<Self> {
        let metrics = Arc::new(InMemoryMetrics::new());
        let sink: Arc<dyn MetricsSink> = metrics.clone();
        Self::assemble(max_request_timeout, sink, metrics, |state| state)
    }

    /// Gateway whose counters go to a Prometheus registry served on
    /// `/metrics`; `metrics` stays at zero.
    pub fn exporting() -> eyre::Result<Self> {
        let prometheus = Arc::new(PrometheusMetrics::new());
        let handle = prometheus.handle();
        Self::assemble(
            Duration::from_secs(5),
            prometheus,
            Arc::new(InMemoryMetrics::new()),
            |state| state.with_metrics_endpoint(handle),
        )
    }

    fn assemble(
        max_request_timeout: Duration,
        sink: Arc<dyn MetricsSink>,
        metrics: Arc<InMemoryMetrics>,
        finish: impl FnOnce(AppState) -> AppState,
    ) -> eyre::Result<Self> {
        let store = Arc::new(InMemoryTaskStore::new());
        let broker = InMemoryBroker::new(PARTITIONS);
        let gate = StaticAuthGate::new()
            .with_token(TOKEN_U1, Principal::new("u1")?)
            .with_token(TOKEN_U2, Principal::new("u2")?);

        let dyn_store: Arc<dyn TaskStore> = store.clone();
        let publisher: Arc<dyn EventPublisher> = Arc::new(broker.publisher(TOPIC));
        let ingestion = Arc::new(IngestionService::new(
            dyn_store,
            publisher,
            Arc::new(DefaultClock),
            sink,
        ));
        let chain = InterceptorChain::new()
            .with(RequestIdInterceptor)
            .with(BearerAuthInterceptor::new(Arc::new(gate)));
        let app = router(finish(AppState::new(ingestion, chain, max_request_timeout)));
        Ok(Self {
            app,
            store,
            broker,
            metrics,
        })
    }

    /// Sends one request and returns the status and raw body text.
    pub async fn send_text(&self, request: Request<Body>) -> eyre::Result<(StatusCode, String)> {
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, String::from_utf8(bytes.to_vec())?))
    }

    /// Sends one request through a fresh clone of the router.
    pub async fn send(&self, request: Request<Body>) -> eyre::Result<Reply> {
        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok(Reply {
            status,
            headers,
            body,
        })
    }
}

/// Decoded response.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    /// Returns the `error` message of a failure body.
    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

/// Builds `POST /api/upload` with a raw body.
pub fn upload(token: Option<&str>, body: &str) -> eyre::Result<Request<Body>> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    Ok(builder.body(Body::from(body.to_owned()))?)
}

/// Builds a `GET` for `path`.
pub fn get(path: &str, token: Option<&str>) -> eyre::Result<Request<Body>> {
    let mut builder = Request::builder().method(Method::GET).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    Ok(builder.body(Body::empty())?)
}
