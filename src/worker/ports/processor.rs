//! Processing port.

use async_trait::async_trait;
use thiserror::Error;

use crate::task::domain::{ResultUri, SourceUri, TaskId};

/// Failure of the transformation itself. Terminal for the task.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("processing failed: {0}")]
pub struct ProcessingError(pub String);

/// Transforms a source reference into a result reference.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Processes the input of task `task_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] when the input cannot be processed.
    async fn process(
        &self,
        task_id: TaskId,
        source_uri: &SourceUri,
    ) -> Result<ResultUri, ProcessingError>;
}
