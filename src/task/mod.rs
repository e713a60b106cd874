//! Image-processing task records and their lifecycle.
//!
//! A task is created `PENDING` by the gateway, claimed as `PROCESSING` by a
//! worker and finished as `COMPLETED` (with a result reference) or
//! `FAILED`. Lifecycle writes go through conditional transitions so
//! duplicate deliveries cannot move a task backwards.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]

pub mod adapters;
pub mod domain;
pub mod ports;
