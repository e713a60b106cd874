//! Domain model for the task lifecycle.
//!
//! The task domain models creation, the forward-only status machine and the
//! event envelope handed to the broker, keeping infrastructure concerns
//! outside of the domain boundary.

mod error;
mod event;
mod ids;
mod task;

pub use error::{ParseTaskStatusError, TaskDomainError};
pub use event::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TaskEvent, TraceContext};
pub use ids::{OwnerId, ResultUri, SourceUri, TaskId};
pub use task::{PersistedTaskData, Task, TaskStatus};
