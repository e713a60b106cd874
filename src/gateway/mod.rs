//! Ingestion gateway: accepts task submissions and lists a caller's tasks.
//!
//! [`IngestionService`] holds the submit/list orchestration; [`http`]
//! exposes it over axum behind an ordered chain of request interceptors
//! that authenticate the caller before any store or broker access.

pub mod http;
mod service;

pub use service::{IngestionError, IngestionResult, IngestionService, SubmitRequest};

#[cfg(test)]
mod tests;
