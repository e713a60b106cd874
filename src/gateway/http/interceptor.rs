//! Ordered request interceptors run before authenticated handlers.
//!
//! Each interceptor receives the [`Admission`] built by the interceptors
//! before it and either returns it, possibly extended, or rejects the
//! request with an [`ApiError`]. The request itself is never mutated; the
//! final admission is handed to the route handler as an argument. The chain
//! is assembled once when the router is built.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request, header};
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use super::server::AppState;
use super::{ApiError, Authenticated};
use crate::auth::{
    domain::{BearerToken, CredentialError, Principal},
    ports::AuthGate,
};

/// Header carrying the request correlation identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// What the interceptors established about a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    request_id: Option<RequestId>,
    principal: Option<Principal>,
}

impl Admission {
    /// Records the correlation identifier.
    #[must_use]
    pub fn with_request_id(self, request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ..self
        }
    }

    /// Records the authenticated caller.
    #[must_use]
    pub fn with_principal(self, principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            ..self
        }
    }

    /// Returns the correlation identifier, if one was assigned.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Returns the authenticated caller, if authentication ran.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }
}

/// A request refused by the chain.
///
/// Carries the correlation identifier assigned before the refusal so the
/// error response can echo it.
#[derive(Debug)]
pub struct Rejection {
    request_id: Option<RequestId>,
    error: ApiError,
}

impl Rejection {
    /// Returns the refusal.
    #[must_use]
    pub const fn error(&self) -> &ApiError {
        &self.error
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        with_request_id(self.error.into_response(), self.request_id.as_ref())
    }
}

/// One step of the pre-handler pipeline.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Inspects the request and returns `admission`, possibly extended.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] to send instead of running the handler.
    async fn intercept(&self, parts: &Parts, admission: Admission) -> Result<Admission, ApiError>;
}

/// Interceptors applied in insertion order; the first rejection wins.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl InterceptorChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor.
    #[must_use]
    pub fn with(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Returns the number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` when the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs every interceptor in order, threading the admission through.
    ///
    /// # Errors
    ///
    /// Returns the first rejection.
    pub async fn run(&self, parts: &Parts) -> Result<Admission, Rejection> {
        let mut admission = Admission::default();
        for interceptor in &self.interceptors {
            let request_id = admission.request_id().cloned();
            admission = interceptor
                .intercept(parts, admission)
                .await
                .map_err(|error| Rejection { request_id, error })?;
        }
        Ok(admission)
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

/// Runs the chain for `request` and, once admitted, calls `handler` with
/// the authenticated principal.
///
/// The correlation identifier is echoed on every response, including
/// refusals.
pub(super) async fn admit<H, F, R>(state: AppState, request: Request<Body>, handler: H) -> Response
where
    H: FnOnce(AppState, Authenticated, Parts, Body) -> F,
    F: Future<Output = R>,
    R: IntoResponse,
{
    let (parts, body) = request.into_parts();
    let admission = match state.interceptors().run(&parts).await {
        Ok(admission) => admission,
        Err(rejection) => return rejection.into_response(),
    };
    let request_id = admission.request_id().cloned();
    let Some(principal) = admission.principal().cloned() else {
        let refused = ApiError::unauthorized("Authorization header required").into_response();
        return with_request_id(refused, request_id.as_ref());
    };
    let response = handler(state, Authenticated(principal), parts, body)
        .await
        .into_response();
    with_request_id(response, request_id.as_ref())
}

fn with_request_id(mut response: Response, request_id: Option<&RequestId>) -> Response {
    if let Some(value) = request_id.and_then(|RequestId(id)| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Correlation identifier attached to each intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Reuses the caller's `x-request-id` or assigns a fresh one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdInterceptor;

#[async_trait]
impl RequestInterceptor for RequestIdInterceptor {
    async fn intercept(&self, parts: &Parts, admission: Admission) -> Result<Admission, ApiError> {
        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
        Ok(admission.with_request_id(RequestId(id)))
    }
}

/// Validates the bearer credential and admits the resulting
/// [`Principal`].
///
/// Missing or malformed headers are rejected before the auth gate is
/// called.
#[derive(Clone)]
pub struct BearerAuthInterceptor {
    gate: Arc<dyn AuthGate>,
}

impl BearerAuthInterceptor {
    /// Creates an interceptor validating against `gate`.
    #[must_use]
    pub fn new(gate: Arc<dyn AuthGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl RequestInterceptor for BearerAuthInterceptor {
    async fn intercept(&self, parts: &Parts, admission: Admission) -> Result<Admission, ApiError> {
        let header_value = match parts.headers.get(header::AUTHORIZATION) {
            None => None,
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| ApiError::from(CredentialError::Malformed))?,
            ),
        };
        let token = BearerToken::from_authorization(header_value)?;
        let principal: Principal = self.gate.validate(&token).await.map_err(|err| {
            tracing::warn!(error = %err, "credential not accepted");
            ApiError::from(err)
        })?;
        Ok(admission.with_principal(principal))
    }
}
