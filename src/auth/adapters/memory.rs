//! Token-table auth gate for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{
    domain::{BearerToken, Principal},
    ports::{AuthGate, AuthGateError, AuthGateResult},
};

/// Auth gate backed by a fixed token-to-principal table.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthGate {
    tokens: Arc<HashMap<String, Principal>>,
}

impl StaticAuthGate {
    /// Creates a gate that accepts no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a gate that additionally accepts `token` for `principal`.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>, principal: Principal) -> Self {
        let mut tokens = (*self.tokens).clone();
        tokens.insert(token.into(), principal);
        Self {
            tokens: Arc::new(tokens),
        }
    }
}

#[async_trait]
impl AuthGate for StaticAuthGate {
    async fn validate(&self, token: &BearerToken) -> AuthGateResult<Principal> {
        self.tokens
            .get(token.expose())
            .cloned()
            .ok_or(AuthGateError::Rejected)
    }
}
