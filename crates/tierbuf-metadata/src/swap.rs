//! Swap blob placement records.
//!
//! A blob evicted from the buffer tiers is described by a [`SwapBlob`]:
//! which node's swap file holds it, at what offset, how many bytes, and
//! which bucket it belongs to. The record travels through interfaces that
//! move `BufferId` lists, so it encodes as four 64-bit words, one per
//! member. A real swap manager consuming these records is future work; the
//! metadata plane only tags swap blobs (negative node id) and round-trips
//! the placement record.

use serde::{Deserialize, Serialize};
use tierbuf_common::{BucketId, BufferId};

/// Number of 64-bit words in an encoded swap blob.
pub const SWAP_BLOB_WORDS: usize = 4;

/// Placement of one blob in a node's swap file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapBlob {
    /// Node whose swap file holds the payload
    pub node_id: u32,
    /// Byte offset in the swap file
    pub offset: u64,
    /// Payload size in bytes
    pub size: u64,
    /// Bucket the blob belongs to
    pub bucket_id: BucketId,
}

impl SwapBlob {
    /// Encode as a buffer-id vector, one member per word.
    #[must_use]
    pub fn to_buffer_ids(&self) -> Vec<BufferId> {
        vec![
            BufferId::from_u64(u64::from(self.node_id)),
            BufferId::from_u64(self.offset),
            BufferId::from_u64(self.size),
            BufferId::from_u64(self.bucket_id.as_u64()),
        ]
    }

    /// Decode from a buffer-id vector produced by
    /// [`SwapBlob::to_buffer_ids`]; `None` if the length is wrong.
    #[must_use]
    pub fn from_buffer_ids(ids: &[BufferId]) -> Option<Self> {
        if ids.len() != SWAP_BLOB_WORDS {
            return None;
        }
        Some(Self {
            node_id: ids[0].as_u64() as u32,
            offset: ids[1].as_u64(),
            size: ids[2].as_u64(),
            bucket_id: BucketId::from_u64(ids[3].as_u64()),
        })
    }
}
