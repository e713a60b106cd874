//! Liveness, readiness and the metrics endpoint.

use crate::pipeline::{Gateway, TOKEN_U1, get, upload};
use axum::http::StatusCode;
use eyre::Result;
use rstest::rstest;
use serde_json::json;

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn health_needs_no_credential() -> Result<()> {
    let gateway = Gateway::new()?;

    let reply = gateway.send(get("/health", None)?).await?;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"status": "ok"}));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn ready_reports_store_reachable() -> Result<()> {
    let gateway = Gateway::new()?;

    let reply = gateway.send(get("/ready", None)?).await?;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"status": "ready"}));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn metrics_endpoint_exports_gateway_counters() -> Result<()> {
    let gateway = Gateway::exporting()?;
    let created = gateway
        .send(upload(Some(TOKEN_U1), r#"{"source_uri": "s3://bucket/a.png"}"#)?)
        .await?;
    assert_eq!(created.status, StatusCode::CREATED);

    let (status, text) = gateway.send_text(get("/metrics", None)?).await?;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("pixelflow_tasks_created_total 1"), "{text}");
    assert!(text.contains("pixelflow_events_published_total 1"), "{text}");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn metrics_endpoint_is_absent_without_exporter() -> Result<()> {
    let gateway = Gateway::new()?;

    let (status, _) = gateway.send_text(get("/metrics", None)?).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
