//! Fixed-delay stand-in for the image transformation.

use async_trait::async_trait;
use std::time::Duration;

use crate::task::domain::{ResultUri, SourceUri, TaskId};
use crate::worker::ports::{ProcessingError, TaskProcessor};

/// Waits a fixed time, then reports `{base}/{task_id}.jpg` as the result.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    delay: Duration,
    result_base: String,
}

impl SimulatedProcessor {
    /// Creates a processor with the given delay and result base URL.
    #[must_use]
    pub fn new(delay: Duration, result_base: impl Into<String>) -> Self {
        let base: String = result_base.into();
        Self {
            delay,
            result_base: base.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl TaskProcessor for SimulatedProcessor {
    async fn process(
        &self,
        task_id: TaskId,
        source_uri: &SourceUri,
    ) -> Result<ResultUri, ProcessingError> {
        tracing::debug!(%task_id, source_uri = %source_uri, delay_ms = ?self.delay, "processing");
        tokio::time::sleep(self.delay).await;
        ResultUri::new(format!("{}/{task_id}.jpg", self.result_base))
            .map_err(|err| ProcessingError(err.to_string()))
    }
}
