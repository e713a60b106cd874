//! `POST /api/upload`.

use crate::pipeline::{Gateway, TOKEN_U1, TOPIC, upload};
use axum::http::{StatusCode, header};
use eyre::{OptionExt, Result};
use pixelflow::gateway::http::{REQUEST_ID_HEADER, REQUEST_TIMEOUT_HEADER};
use pixelflow::task::domain::{TaskId, TaskStatus};
use pixelflow::task::ports::TaskStore;
use rstest::{fixture, rstest};
use serde_json::Value;

#[fixture]
fn gateway() -> Gateway {
    Gateway::new().expect("gateway wiring")
}

fn assert_untouched(gateway: &Gateway) -> Result<()> {
    assert!(gateway.store.is_empty()?, "no task may be stored");
    assert!(
        gateway.broker.published_events(TOPIC)?.is_empty(),
        "no event may be published"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn accepted_upload_returns_pending_task(gateway: Gateway) -> Result<()> {
    let reply = gateway
        .send(upload(Some(TOKEN_U1), r#"{"source_uri": "http://x/a.jpg"}"#)?)
        .await?;

    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["status"], "PENDING");
    assert_eq!(reply.body["owner_id"], "u1");
    assert_eq!(reply.body["source_uri"], "http://x/a.jpg");
    assert_eq!(reply.body["result_uri"], Value::Null);
    assert!(reply.headers.contains_key(REQUEST_ID_HEADER));

    let id = reply.body["id"].as_str().ok_or_eyre("id missing")?;
    let task_id = TaskId::try_from(id)?;
    let stored = gateway
        .store
        .find_by_id(task_id)
        .await?
        .ok_or_eyre("task not stored")?;
    assert_eq!(stored.status(), TaskStatus::Pending);

    let events = gateway.broker.published_events(TOPIC)?;
    assert_eq!(events.len(), 1);
    assert_eq!(events.first().map(|event| event.task_id()), Some(task_id));
    assert_eq!(gateway.metrics.snapshot().tasks_created, 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn caller_request_id_is_echoed(gateway: Gateway) -> Result<()> {
    let mut request = upload(Some(TOKEN_U1), r#"{"source_uri": "http://x/a.jpg"}"#)?;
    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, "req-42".parse()?);

    let reply = gateway.send(request).await?;

    assert_eq!(
        reply.headers.get(REQUEST_ID_HEADER).map(|value| value.as_bytes()),
        Some(b"req-42".as_slice())
    );
    Ok(())
}

#[rstest]
#[case::no_header(None)]
#[case::unknown_token(Some("forged"))]
#[tokio::test(flavor = "multi_thread")]
async fn unauthenticated_upload_is_rejected(
    gateway: Gateway,
    #[case] token: Option<&str>,
) -> Result<()> {
    let reply = gateway
        .send(upload(token, r#"{"source_uri": "http://x/a.jpg"}"#)?)
        .await?;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert!(reply.error().is_some());
    assert_untouched(&gateway)
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn non_bearer_scheme_is_rejected(gateway: Gateway) -> Result<()> {
    let mut request = upload(None, r#"{"source_uri": "http://x/a.jpg"}"#)?;
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Basic dTE6cGFzcw==".parse()?);

    let reply = gateway.send(request).await?;

    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_untouched(&gateway)
}

#[rstest]
#[case::missing_field("{}", "source_uri is required")]
#[case::null_field(r#"{"source_uri": null}"#, "source_uri is required")]
#[case::not_json("source_uri=a", "Request body must be a JSON object")]
#[case::blank_field(r#"{"source_uri": "   "}"#, "source_uri must not be empty")]
#[tokio::test(flavor = "multi_thread")]
async fn invalid_body_is_rejected(
    gateway: Gateway,
    #[case] body: &str,
    #[case] message: &str,
) -> Result<()> {
    let reply = gateway.send(upload(Some(TOKEN_U1), body)?).await?;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.error(), Some(message));
    assert_untouched(&gateway)
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn broker_outage_leaves_pending_task(gateway: Gateway) -> Result<()> {
    gateway.broker.set_available(false)?;

    let reply = gateway
        .send(upload(Some(TOKEN_U1), r#"{"source_uri": "http://x/a.jpg"}"#)?)
        .await?;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    let message = reply.error().ok_or_eyre("error body missing")?;
    assert!(message.contains("could not be queued"), "{message}");
    assert_eq!(gateway.store.len()?, 1);
    assert_eq!(gateway.metrics.snapshot().publish_errors, 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn malformed_timeout_header_is_rejected(gateway: Gateway) -> Result<()> {
    let mut request = upload(Some(TOKEN_U1), r#"{"source_uri": "http://x/a.jpg"}"#)?;
    request
        .headers_mut()
        .insert(REQUEST_TIMEOUT_HEADER, "soon".parse()?);

    let reply = gateway.send(request).await?;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_untouched(&gateway)
}
