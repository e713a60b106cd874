//! Port contracts for task processing.

mod processor;

pub use processor::{ProcessingError, TaskProcessor};
