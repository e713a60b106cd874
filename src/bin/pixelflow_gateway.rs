//! Ingestion gateway process.
//!
//! Reads `PIXELFLOW_*` settings from the environment, connects the task
//! store and the broker, and serves the HTTP surface (with `/metrics`)
//! until Ctrl-C.

use eyre::{Result, WrapErr};
use mockable::DefaultClock;
use pixelflow::auth::adapters::HttpAuthGate;
use pixelflow::auth::ports::AuthGate;
use pixelflow::broker::adapters::postgres::PostgresEventPublisher;
use pixelflow::broker::ports::EventPublisher;
use pixelflow::config::GatewayConfig;
use pixelflow::gateway::IngestionService;
use pixelflow::gateway::http::{
    AppState, BearerAuthInterceptor, InterceptorChain, RequestIdInterceptor, router, serve,
};
use pixelflow::pg::{PgPool, build_first_available, ensure_schema};
use pixelflow::task::adapters::postgres::PostgresTaskStore;
use pixelflow::task::ports::TaskStore;
use pixelflow::telemetry::{MetricsSink, PrometheusMetrics, init_logging};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const POOL_SIZE: u32 = 16;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env().wrap_err("invalid gateway configuration")?;
    init_logging(config.log_format);

    let store_pool = connect(std::slice::from_ref(&config.database_url)).await?;
    let broker_pool = connect(&config.broker_urls).await?;

    let clock = Arc::new(DefaultClock);
    let store: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(store_pool));
    let publisher: Arc<dyn EventPublisher> = Arc::new(PostgresEventPublisher::new(
        broker_pool,
        config.topic.clone(),
        config.partitions,
        config.publish_timeout,
        Arc::clone(&clock),
    ));
    let gate: Arc<dyn AuthGate> = Arc::new(
        HttpAuthGate::new(&config.auth_url, config.auth_timeout)
            .wrap_err("failed to build auth gate client")?,
    );
    let prometheus = Arc::new(PrometheusMetrics::new());
    let exporter = prometheus.handle();
    let metrics: Arc<dyn MetricsSink> = prometheus;

    let ingestion = Arc::new(IngestionService::new(store, publisher, clock, metrics));
    let interceptors = InterceptorChain::new()
        .with(RequestIdInterceptor)
        .with(BearerAuthInterceptor::new(gate));
    let app = router(
        AppState::new(ingestion, interceptors, config.max_request_timeout)
            .with_metrics_endpoint(exporter),
    );

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .wrap_err_with(|| format!("failed to bind port {}", config.port))?;
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    serve(listener, app, shutdown).await.wrap_err("gateway server failed")?;
    tracing::info!("gateway stopped");
    Ok(())
}

async fn connect(urls: &[String]) -> Result<PgPool> {
    let candidates = urls.to_vec();
    tokio::task::spawn_blocking(move || -> Result<PgPool> {
        let pool = build_first_available(&candidates, POOL_SIZE, CONNECT_TIMEOUT)?;
        let mut conn = pool.get()?;
        ensure_schema(&mut conn).wrap_err("failed to create schema")?;
        Ok(pool)
    })
    .await?
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl-C");
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}
