//! HTTP client for the external auth service.
//!
//! The service answers `POST {base}/validate` with `{"valid": bool,
//! "user_id": string}`. Any non-2xx status or `valid = false` is a
//! rejection; transport failures surface as unavailability.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth::{
    domain::{BearerToken, Principal},
    ports::{AuthGate, AuthGateError, AuthGateResult},
};

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    user_id: String,
}

/// Auth gate calling a remote validation endpoint.
#[derive(Debug, Clone)]
pub struct HttpAuthGate {
    client: Client,
    validate_url: String,
}

impl HttpAuthGate {
    /// Creates a client for the auth service at `base_url`, bounding every
    /// validation call by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthGateError::Unavailable`] when the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: &str, timeout: Duration) -> AuthGateResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AuthGateError::unavailable)?;
        Ok(Self {
            client,
            validate_url: format!("{}/validate", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl AuthGate for HttpAuthGate {
    async fn validate(&self, token: &BearerToken) -> AuthGateResult<Principal> {
        let response = self
            .client
            .post(&self.validate_url)
            .json(&ValidateRequest {
                token: token.expose(),
            })
            .send()
            .await
            .map_err(AuthGateError::unavailable)?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "auth gate refused credential");
            return Err(AuthGateError::Rejected);
        }

        let body: ValidateResponse = response.json().await.map_err(AuthGateError::unavailable)?;
        if !body.valid {
            return Err(AuthGateError::Rejected);
        }
        Principal::new(body.user_id).map_err(|_| AuthGateError::Rejected)
    }
}
