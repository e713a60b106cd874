//! Route handlers.
//!
//! `/api` handlers are split in two: the axum entry point hands the raw
//! request to the interceptor chain, and the inner function receives the
//! admitted principal as an argument.

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::extract::trace_context;
use super::interceptor::admit;
use super::{ApiError, ApiResult, AppState, Authenticated, RequestDeadline};
use crate::gateway::SubmitRequest;
use crate::task::domain::Task;

/// Largest accepted upload body.
const BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(default)]
    source_uri: Option<String>,
}

/// Liveness check.
pub(super) async fn health() -> Response {
    Json(StatusBody { status: "ok" }).into_response()
}

/// Readiness check: succeeds once the task store answers.
pub(super) async fn ready(State(state): State<AppState>) -> Response {
    match state.ingestion().ready().await {
        Ok(()) => Json(StatusBody { status: "ready" }).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            ApiError::unavailable("Task store unavailable").into_response()
        }
    }
}

pub(super) async fn upload(State(state): State<AppState>, request: Request<Body>) -> Response {
    admit(state, request, submit).await
}

pub(super) async fn list_tasks(State(state): State<AppState>, request: Request<Body>) -> Response {
    admit(state, request, list).await
}

async fn submit(
    state: AppState,
    Authenticated(principal): Authenticated,
    parts: Parts,
    body: Body,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let RequestDeadline(deadline) =
        RequestDeadline::from_headers(&parts.headers, state.max_request_timeout())?;
    let bytes = to_bytes(body, BODY_LIMIT)
        .await
        .map_err(|_| ApiError::bad_request("Request body could not be read"))?;
    let parsed: UploadRequest = serde_json::from_slice(&bytes)
        .map_err(|_| ApiError::bad_request("Request body must be a JSON object"))?;
    let source_uri = parsed
        .source_uri
        .ok_or_else(|| ApiError::bad_request("source_uri is required"))?;

    let request = SubmitRequest::new(source_uri)
        .with_trace(trace_context(&parts.headers))
        .with_deadline(deadline);
    let task = state.ingestion().submit(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list(
    state: AppState,
    Authenticated(principal): Authenticated,
    parts: Parts,
    _body: Body,
) -> ApiResult<Json<Vec<Task>>> {
    let RequestDeadline(deadline) =
        RequestDeadline::from_headers(&parts.headers, state.max_request_timeout())?;
    let tasks = state.ingestion().list(&principal, Some(deadline)).await?;
    Ok(Json(tasks))
}
