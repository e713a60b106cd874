//! Broker domain: partitioning, deliveries and the wire codec.

mod codec;
mod delivery;
mod partition;

pub use codec::{CodecError, EncodedMessage, decode_event, encode_event};
pub use delivery::{Delivery, PublishReceipt};
pub use partition::{PartitionId, partition_for};
pub(crate) use partition::fnv1a;
