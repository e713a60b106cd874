//! Worker side of the pipeline: consumes task events and drives each task
//! to a terminal status.
//!
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Handler, consume loop and pool in [`services`]

pub mod adapters;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
