//! Auth gate port.

use crate::auth::domain::{BearerToken, Principal};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for auth gate calls.
pub type AuthGateResult<T> = Result<T, AuthGateError>;

/// Stateless credential validation capability.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Resolves a bearer token to the principal it was issued to.
    ///
    /// # Errors
    ///
    /// Returns [`AuthGateError::Rejected`] for unknown, expired or otherwise
    /// invalid tokens and [`AuthGateError::Unavailable`] when the validator
    /// cannot be reached.
    async fn validate(&self, token: &BearerToken) -> AuthGateResult<Principal>;
}

/// Errors returned by auth gate implementations.
#[derive(Debug, Clone, Error)]
pub enum AuthGateError {
    /// The credential was refused.
    #[error("credential rejected")]
    Rejected,

    /// The validator could not be reached or answered garbage.
    #[error("auth gate unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),
}

impl AuthGateError {
    /// Wraps a transport-level error.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }
}
