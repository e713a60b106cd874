//! Domain model for authenticated callers.

mod credential;
mod principal;

pub use credential::{BearerToken, CredentialError};
pub use principal::Principal;
