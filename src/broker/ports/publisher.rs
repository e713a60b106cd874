//! Producer port.

use super::BrokerResult;
use crate::broker::domain::PublishReceipt;
use crate::task::domain::TaskEvent;
use async_trait::async_trait;

/// Appends task events to the durable broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `event` keyed by its task identifier.
    ///
    /// Blocks until the broker durably accepts the event or the adapter's
    /// bound elapses. A single attempt is made; callers decide whether to
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns [`super::BrokerError::Timeout`] when the bound elapses and
    /// [`super::BrokerError::Unavailable`] on transport failure.
    async fn publish(&self, event: &TaskEvent) -> BrokerResult<PublishReceipt>;
}
