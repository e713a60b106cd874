//! Durable hand-off between the ingestion gateway and workers.
//!
//! Events are keyed by task identifier and routed to a fixed partition, so
//! events for one task are consumed in publish order by a single member of
//! a consumer group. Delivery is at-least-once: a read position only moves
//! after the consumer acknowledges a delivery.
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]

pub mod adapters;
pub mod domain;
pub mod ports;

#[cfg(test)]
mod tests;
