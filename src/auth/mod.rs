//! Caller authentication for the ingestion gateway.
//!
//! Credential issuance lives in an external service; this module only
//! consumes its `validate(token)` capability.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]

pub mod adapters;
pub mod domain;
pub mod ports;
