//! Producer and consumer contracts for the durable broker.

mod consumer;
mod publisher;

pub use consumer::EventConsumer;
pub use publisher::EventPublisher;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::domain::PartitionId;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors returned by broker adapters.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(Arc<dyn std::error::Error + Send + Sync>),

    /// The broker did not acknowledge within the bound.
    #[error("broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    /// The event could not be encoded for transport.
    #[error(transparent)]
    Codec(#[from] crate::broker::domain::CodecError),

    /// The consumer no longer owns the partition of an acknowledged
    /// delivery; the message will be redelivered elsewhere.
    #[error("partition {partition} no longer assigned to this consumer")]
    Revoked {
        /// Partition whose ownership was lost.
        partition: PartitionId,
    },

    /// The consumer has been closed.
    #[error("consumer closed")]
    Closed,
}

impl BrokerError {
    /// Wraps a transport-level error.
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Arc::new(err))
    }

    /// Returns `true` for failures worth retrying after a pause.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}
