//! Published and received message metadata.

use super::{CodecError, PartitionId};
use crate::task::domain::TaskEvent;

/// Acknowledgement returned once the broker durably accepted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Partition the event was appended to.
    pub partition: PartitionId,
    /// Position of the event within its partition.
    pub offset: u64,
}

/// A message handed to one consumer of a group.
///
/// The read position of its partition does not advance until the delivery
/// is acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    partition: PartitionId,
    offset: u64,
    payload: Result<TaskEvent, CodecError>,
}

impl Delivery {
    /// Creates a delivery for a decoded or undecodable message.
    #[must_use]
    pub const fn new(
        partition: PartitionId,
        offset: u64,
        payload: Result<TaskEvent, CodecError>,
    ) -> Self {
        Self {
            partition,
            offset,
            payload,
        }
    }

    /// Returns the partition the message was read from.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Returns the message position within its partition.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the decoded event, or the reason it could not be decoded.
    ///
    /// # Errors
    ///
    /// Returns the [`CodecError`] for malformed payloads.
    pub const fn event(&self) -> Result<&TaskEvent, &CodecError> {
        self.payload.as_ref()
    }
}
