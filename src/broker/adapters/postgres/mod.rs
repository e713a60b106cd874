//! `PostgreSQL`-backed partitioned log implementing the broker ports.
//!
//! Messages live in `broker_messages`; each consumer group tracks its
//! committed offset per partition in `broker_offsets` and spreads partitions
//! across its live members through expiring rows in `broker_leases`. A member
//! that stops heartbeating loses its leases once they expire, and whoever
//! claims the partition next resumes after the last committed offset.

mod consumer;
mod models;
mod publisher;
mod schema;

pub use consumer::{ConsumerSettings, PostgresEventConsumer};
pub use publisher::PostgresEventPublisher;
