//! `GET /api/tasks`.

use crate::pipeline::{Gateway, TOKEN_U1, TOKEN_U2, get, upload};
use axum::http::StatusCode;
use eyre::{OptionExt, Result};
use rstest::rstest;

async fn submit(gateway: &Gateway, token: &str, source: &str) -> Result<()> {
    let body = serde_json::json!({ "source_uri": source }).to_string();
    let reply = gateway.send(upload(Some(token), &body)?).await?;
    eyre::ensure!(reply.status == StatusCode::CREATED, "upload failed: {reply:?}");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn listing_is_scoped_to_caller() -> Result<()> {
    let gateway = Gateway::new()?;
    submit(&gateway, TOKEN_U1, "http://x/a.jpg").await?;
    submit(&gateway, TOKEN_U2, "http://x/b.jpg").await?;
    submit(&gateway, TOKEN_U1, "http://x/c.jpg").await?;

    let reply = gateway.send(get("/api/tasks", Some(TOKEN_U1))?).await?;

    assert_eq!(reply.status, StatusCode::OK);
    let tasks = reply.body.as_array().ok_or_eyre("expected an array")?;
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|task| task["owner_id"] == "u1"));
    assert_eq!(gateway.metrics.snapshot().tasks_listed, 2);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn empty_listing_is_an_empty_array() -> Result<()> {
    let gateway = Gateway::new()?;

    let reply = gateway.send(get("/api/tasks", Some(TOKEN_U2))?).await?;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, serde_json::json!([]));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn listing_requires_credential() -> Result<()> {
    let gateway = Gateway::new()?;

    let reply = gateway.send(get("/api/tasks", None)?).await?;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().is_some());
    Ok(())
}
