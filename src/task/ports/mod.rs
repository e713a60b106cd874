//! Port contracts for task persistence.
//!
//! Ports define infrastructure-agnostic interfaces used by the gateway and
//! worker services.

pub mod store;

pub use store::{TaskStore, TaskStoreError, TaskStoreResult, TaskStream, TransitionOutcome};
