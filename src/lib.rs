//! Pixelflow: asynchronous image-task ingestion pipeline.
//!
//! Clients submit image-processing tasks to an HTTP gateway, which records
//! each task and hands an event to a durable, partitioned broker. Workers
//! in a consumer group pick events up and drive the task through
//! `PENDING -> PROCESSING -> COMPLETED | FAILED`.
//!
//! # Architecture
//!
//! Each bounded context is split the hexagonal way:
//!
//! - **Domain**: value types and state machines with no I/O
//! - **Ports**: async traits at every infrastructure seam
//! - **Adapters**: in-memory and PostgreSQL implementations of the ports
//!
//! # Modules
//!
//! - [`task`]: the task record, its lifecycle and the task store
//! - [`auth`]: bearer credentials and the external auth gate
//! - [`broker`]: keyed, partitioned at-least-once event transport
//! - [`gateway`]: submit/list orchestration and the HTTP surface
//! - [`worker`]: consume loop, per-event handler and worker pool
//! - [`reconcile`]: republishing for tasks whose event never left
//! - [`telemetry`]: logging setup and injected metrics
//! - [`config`]: environment-driven process configuration

pub mod auth;
pub mod broker;
pub mod config;
pub mod gateway;
pub mod pg;
pub mod reconcile;
pub mod task;
pub mod telemetry;
pub mod worker;
