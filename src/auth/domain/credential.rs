//! Bearer credential parsing.

use std::fmt;
use thiserror::Error;

/// Reasons an `Authorization` header cannot yield a bearer credential.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// No `Authorization` header was sent.
    #[error("Authorization header required")]
    Missing,
    /// The header is not of the form `Bearer <token>`.
    #[error("Invalid authorization header format")]
    Malformed,
}

/// Opaque bearer token extracted from a request.
///
/// The token value is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wraps a raw token value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Malformed`] when the token is blank or
    /// contains whitespace.
    pub fn new(token: impl Into<String>) -> Result<Self, CredentialError> {
        let value: String = token.into();
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(CredentialError::Malformed);
        }
        Ok(Self(value))
    }

    /// Parses an optional `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] for an absent or empty header and
    /// [`CredentialError::Malformed`] unless the value is exactly
    /// `Bearer <token>`.
    pub fn from_authorization(header: Option<&str>) -> Result<Self, CredentialError> {
        let Some(raw) = header.map(str::trim).filter(|value| !value.is_empty()) else {
            return Err(CredentialError::Missing);
        };
        let mut parts = raw.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("Bearer"), Some(token), None) => Self::new(token),
            _ => Err(CredentialError::Malformed),
        }
    }

    /// Returns the raw token for forwarding to the auth gate.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}
