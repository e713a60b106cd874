//! Stable key-to-partition routing.

use crate::task::domain::TaskId;

/// Zero-based partition index within a topic.
pub type PartitionId = u32;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Returns the partition an event keyed by `key` is routed to.
///
/// Uses 32-bit FNV-1a over the UUID bytes so every process, on every
/// platform, agrees on the mapping. `partitions` of zero is treated as one.
#[must_use]
pub fn partition_for(key: TaskId, partitions: u32) -> PartitionId {
    fnv1a(key.as_ref().as_bytes())
        .checked_rem(partitions)
        .unwrap_or(0)
}

/// 32-bit FNV-1a hash.
pub(crate) fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |acc, byte| {
        (acc ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}
