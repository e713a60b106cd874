//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::auth::{domain::CredentialError, ports::AuthGateError};
use crate::gateway::IngestionError;
use crate::task::ports::TaskStoreError;

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error body returned for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Client-safe message.
    pub error: String,
}

/// HTTP error with a client-safe message.
///
/// Dependency failures are logged where they occur; the message sent to the
/// client never carries their details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// 400 for malformed input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 401 for missing or rejected credentials.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// 503 for unreachable dependencies.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// 504 for expired caller deadlines.
    #[must_use]
    pub fn deadline_exceeded() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "Request deadline exceeded")
    }

    /// 500 for anything else.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns the HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the client-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(value: CredentialError) -> Self {
        Self::unauthorized(value.to_string())
    }
}

impl From<AuthGateError> for ApiError {
    fn from(value: AuthGateError) -> Self {
        match value {
            AuthGateError::Rejected => Self::unauthorized("Invalid or expired token"),
            AuthGateError::Unavailable(_) => {
                Self::unavailable("Authentication service unavailable")
            }
        }
    }
}

impl From<IngestionError> for ApiError {
    fn from(value: IngestionError) -> Self {
        match value {
            IngestionError::Validation(err) => Self::bad_request(err.to_string()),
            IngestionError::Store(TaskStoreError::Unavailable(_)) => {
                Self::unavailable("Task store unavailable")
            }
            IngestionError::Store(_) => Self::internal("Failed to store task"),
            IngestionError::PublishFailed { task, .. } => Self::unavailable(format!(
                "Task {} was stored but could not be queued for processing",
                task.id()
            )),
            IngestionError::DeadlineExceeded => Self::deadline_exceeded(),
        }
    }
}
