//! Worker process.
//!
//! Runs `PIXELFLOW_WORKER_INSTANCES` competing consume loops in one
//! consumer group plus the pending-task reconciler and a `/metrics`
//! listener, and drains them on Ctrl-C.

use eyre::{Result, WrapErr};
use mockable::DefaultClock;
use pixelflow::broker::adapters::postgres::{
    ConsumerSettings, PostgresEventConsumer, PostgresEventPublisher,
};
use pixelflow::config::WorkerConfig;
use pixelflow::gateway::http::serve;
use pixelflow::pg::{PgPool, build_first_available, ensure_schema};
use pixelflow::reconcile::{PendingReconciler, ReconcileSettings};
use pixelflow::task::adapters::postgres::PostgresTaskStore;
use pixelflow::telemetry::{MetricsSink, PrometheusMetrics, init_logging, metrics_router};
use pixelflow::worker::adapters::SimulatedProcessor;
use pixelflow::worker::services::{ConsumeLoop, LoopSettings, TaskHandler, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env().wrap_err("invalid worker configuration")?;
    init_logging(config.log_format);

    // One connection per consume loop plus one for its lease keeper.
    let pool_size = u32::try_from(config.instances)
        .unwrap_or(u32::MAX)
        .saturating_mul(2)
        .saturating_add(4);
    let store_pool = connect(std::slice::from_ref(&config.database_url), pool_size).await?;
    let broker_pool = connect(&config.broker_urls, pool_size).await?;

    let store = Arc::new(PostgresTaskStore::new(store_pool));
    let clock = Arc::new(DefaultClock);
    let prometheus = Arc::new(PrometheusMetrics::new());
    let exporter = metrics_router(prometheus.handle());
    let metrics: Arc<dyn MetricsSink> = prometheus;
    let handler = Arc::new(TaskHandler::new(
        Arc::clone(&store),
        Arc::new(SimulatedProcessor::new(
            config.processing_delay,
            config.result_base_url.clone(),
        )),
        Arc::clone(&clock),
    ));

    let pool = WorkerPool::new(CancellationToken::new());
    for index in 0..config.instances {
        let consumer = PostgresEventConsumer::new(
            broker_pool.clone(),
            config.topic.clone(),
            config.consumer_group.clone(),
            config.partitions,
            ConsumerSettings {
                lease_ttl: config.lease_ttl,
                ..ConsumerSettings::default()
            },
        );
        pool.start(ConsumeLoop::new(
            format!("worker-{index}"),
            Arc::new(consumer),
            Arc::clone(&handler),
            Arc::clone(&metrics),
            LoopSettings {
                backoff_cap: config.backoff_cap,
                ..LoopSettings::default()
            },
        ));
    }

    let reconciler = PendingReconciler::new(
        store,
        Arc::new(PostgresEventPublisher::new(
            broker_pool,
            config.topic.clone(),
            config.partitions,
            config.publish_timeout,
            Arc::clone(&clock),
        )),
        clock,
        metrics,
        ReconcileSettings::for_threshold(config.reconcile_after),
    );
    let token = pool.token();
    pool.spawn(async move { reconciler.run(&token).await });

    let listener = TcpListener::bind(("0.0.0.0", config.metrics_port))
        .await
        .wrap_err_with(|| format!("failed to bind metrics port {}", config.metrics_port))?;
    let metrics_shutdown = pool.token();
    pool.spawn(async move {
        if let Err(err) = serve(listener, exporter, metrics_shutdown).await {
            tracing::error!(error = %err, "metrics listener failed");
        }
    });

    tracing::info!(
        instances = config.instances,
        group = %config.consumer_group,
        topic = %config.topic,
        "worker started"
    );
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl-C");
    }
    tracing::info!("shutdown requested; draining in-flight work");
    pool.shutdown().await;
    tracing::info!("worker stopped");
    Ok(())
}

async fn connect(urls: &[String], pool_size: u32) -> Result<PgPool> {
    let candidates = urls.to_vec();
    tokio::task::spawn_blocking(move || -> Result<PgPool> {
        let pool = build_first_available(&candidates, pool_size, CONNECT_TIMEOUT)?;
        let mut conn = pool.get()?;
        ensure_schema(&mut conn).wrap_err("failed to create schema")?;
        Ok(pool)
    })
    .await?
}
