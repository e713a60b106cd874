//! Values derived from an admitted request.

use axum::http::HeaderMap;
use std::time::Duration;
use tokio::time::Instant;

use super::ApiError;
use crate::auth::domain::Principal;
use crate::task::domain::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext};

/// Header carrying the caller's deadline in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// The principal admitted by the authentication interceptor, passed to
/// `/api` handlers as an argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated(pub Principal);

/// Absolute deadline for the store and broker calls of one request.
///
/// Taken from `X-Request-Timeout-Ms` and capped at the configured maximum,
/// which also applies when the header is absent.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline(pub Instant);

impl RequestDeadline {
    /// Reads the deadline from `headers`, capped at `max`.
    ///
    /// # Errors
    ///
    /// Returns a bad-request [`ApiError`] when the header is not a whole
    /// number of milliseconds.
    pub fn from_headers(headers: &HeaderMap, max: Duration) -> Result<Self, ApiError> {
        let requested = match headers.get(REQUEST_TIMEOUT_HEADER) {
            None => max,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .ok_or_else(|| {
                    ApiError::bad_request("X-Request-Timeout-Ms must be a whole number of milliseconds")
                })?,
        };
        Ok(Self(Instant::now() + requested.min(max)))
    }
}

/// Trace headers forwarded to the published event.
pub(super) fn trace_context(parts_headers: &HeaderMap) -> TraceContext {
    let header = |name: &str| {
        parts_headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };
    let mut trace = TraceContext::empty();
    if let Some(value) = header(TRACEPARENT_HEADER) {
        trace = trace.with_traceparent(value);
    }
    if let Some(value) = header(TRACESTATE_HEADER) {
        trace = trace.with_tracestate(value);
    }
    trace
}
