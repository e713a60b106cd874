//! Consumer port.

use super::BrokerResult;
use crate::broker::domain::Delivery;
use async_trait::async_trait;
use std::time::Duration;

/// One member of a named consumer group.
///
/// Within a group each message is handed to exactly one member at a time.
/// A member receives at most one unacknowledged delivery per partition, so
/// events sharing a key are never handled concurrently.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Waits up to `wait` for the next delivery.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns a transient [`super::BrokerError`] when the broker cannot be
    /// read, or [`super::BrokerError::Closed`] after [`Self::close`].
    async fn receive(&self, wait: Duration) -> BrokerResult<Option<Delivery>>;

    /// Commits the read position past `delivery`.
    ///
    /// # Errors
    ///
    /// Returns [`super::BrokerError::Revoked`] if the partition moved to
    /// another member in the meantime.
    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Leaves the group. Unacknowledged deliveries become available to the
    /// remaining members.
    ///
    /// # Errors
    ///
    /// Returns [`super::BrokerError::Unavailable`] if the broker could not be
    /// told.
    async fn close(&self) -> BrokerResult<()>;
}
