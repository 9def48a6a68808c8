//! Packed identifier types.
//!
//! Every tierbuf entity is identified by a 64-bit value that embeds the id
//! of the node owning the entity's metadata. An all-zero value is the NULL
//! id for every type; node numbering starts at 1, so a valid id is never
//! all-zero even for slot index 0.
//!
//! Bit layouts (low to high):
//! - [`BucketId`] / [`VBucketId`]: `index` in bits 0..32, `node_id` in 32..64.
//! - [`BlobId`]: `buffer_ids_offset` in bits 0..32, a *signed* node id in
//!   32..64. A negative node id marks a blob whose payload lives in the swap
//!   region; the home node is the absolute value either way.
//! - [`BufferId`]: `header_index` in bits 0..32, `node_id` in 32..64.
//! - [`TargetId`]: `node_id` in bits 0..32, `device_id` in 32..48, `index`
//!   in 48..64.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical device (tier) on one node.
pub type DeviceId = u16;

/// Identifier of a trait attached to a vbucket.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraitId(pub u64);

/// Unique identifier for a bucket.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(u64);

/// Unique identifier for a vbucket.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VBucketId(u64);

/// Unique identifier for a blob.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(u64);

/// Unique identifier for a buffer owned by the buffer pool.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(u64);

/// Identifier of a storage target (a device-bound placement destination).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(u64);

// BufferId lists and BlobId lists share storage; the membership lists in
// shared memory store both as raw u64 words.
const _: () = assert!(std::mem::size_of::<BlobId>() == std::mem::size_of::<BufferId>());

macro_rules! slot_id {
    ($name:ident) => {
        impl $name {
            /// The reserved all-zero id.
            pub const NULL: Self = Self(0);

            /// Build an id from its home node and slot index.
            #[must_use]
            pub const fn new(node_id: u32, index: u32) -> Self {
                Self(((node_id as u64) << 32) | index as u64)
            }

            /// Reinterpret a raw 64-bit value.
            #[must_use]
            pub const fn from_u64(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw 64-bit value.
            #[must_use]
            pub const fn as_u64(&self) -> u64 {
                self.0
            }

            /// Node that owns the slot this id refers to.
            #[must_use]
            pub const fn node_id(&self) -> u32 {
                (self.0 >> 32) as u32
            }

            /// Index into the owning node's slot table.
            #[must_use]
            pub const fn index(&self) -> u32 {
                self.0 as u32
            }

            /// Whether this is the reserved NULL id.
            #[must_use]
            pub const fn is_null(&self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($name), "(node={}, index={})"),
                    self.node_id(),
                    self.index()
                )
            }
        }
    };
}

slot_id!(BucketId);
slot_id!(VBucketId);

impl BlobId {
    /// The reserved all-zero id.
    pub const NULL: Self = Self(0);

    /// Build a blob id from its home node, buffer-id-list offset, and swap
    /// state. The swap flag rides in the sign of the embedded node id.
    #[must_use]
    pub const fn from_parts(home_node: u32, buffer_ids_offset: u32, in_swap: bool) -> Self {
        let signed = if in_swap {
            -(home_node as i64) as i32
        } else {
            home_node as i32
        };
        Self(((signed as u32 as u64) << 32) | buffer_ids_offset as u64)
    }

    /// Reinterpret a raw 64-bit value.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The embedded node id with its swap sign intact.
    #[must_use]
    pub const fn signed_node(&self) -> i32 {
        (self.0 >> 32) as u32 as i32
    }

    /// The node holding this blob's metadata, regardless of swap state.
    #[must_use]
    pub const fn home_node(&self) -> u32 {
        self.signed_node().unsigned_abs()
    }

    /// Whether the blob's payload has been evicted to the swap region.
    #[must_use]
    pub const fn is_in_swap(&self) -> bool {
        self.signed_node() < 0
    }

    /// Offset of this blob's buffer-id list in its home node's pool storage.
    #[must_use]
    pub const fn buffer_ids_offset(&self) -> u32 {
        self.0 as u32
    }

    /// Whether this is the reserved NULL id.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlobId(node={}, offset={}, swap={})",
            self.home_node(),
            self.buffer_ids_offset(),
            self.is_in_swap()
        )
    }
}

impl BufferId {
    /// The reserved all-zero id.
    pub const NULL: Self = Self(0);

    /// Build a buffer id from its node and header index.
    #[must_use]
    pub const fn new(node_id: u32, header_index: u32) -> Self {
        Self(((node_id as u64) << 32) | header_index as u64)
    }

    /// Reinterpret a raw 64-bit value.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Node whose buffer pool owns this buffer.
    #[must_use]
    pub const fn node_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Index into the owning pool's buffer header array.
    #[must_use]
    pub const fn header_index(&self) -> u32 {
        self.0 as u32
    }

    /// Whether this is the reserved NULL id.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferId(node={}, index={})",
            self.node_id(),
            self.header_index()
        )
    }
}

impl TargetId {
    /// The reserved all-zero id.
    pub const NULL: Self = Self(0);

    /// Build a target id from its node, device, and per-device index.
    #[must_use]
    pub const fn new(node_id: u32, device_id: DeviceId, index: u16) -> Self {
        Self(node_id as u64 | ((device_id as u64) << 32) | ((index as u64) << 48))
    }

    /// Reinterpret a raw 64-bit value.
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Node this target lives on.
    #[must_use]
    pub const fn node_id(&self) -> u32 {
        self.0 as u32
    }

    /// Device backing this target.
    #[must_use]
    pub const fn device_id(&self) -> DeviceId {
        (self.0 >> 32) as u16
    }

    /// Index of this target among the node's targets.
    #[must_use]
    pub const fn index(&self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// Whether this is the reserved NULL id.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TargetId(node={}, device={}, index={})",
            self.node_id(),
            self.device_id(),
            self.index()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_ids_are_all_zero() {
        assert!(BucketId::NULL.is_null());
        assert!(VBucketId::NULL.is_null());
        assert!(BlobId::NULL.is_null());
        assert!(TargetId::NULL.is_null());
        assert_eq!(BucketId::NULL.as_u64(), 0);
    }

    #[test]
    fn test_bucket_id_packing() {
        let id = BucketId::new(3, 17);
        assert_eq!(id.node_id(), 3);
        assert_eq!(id.index(), 17);
        assert!(!id.is_null());
        assert_eq!(BucketId::from_u64(id.as_u64()), id);
    }

    #[test]
    fn test_bucket_id_index_zero_is_not_null() {
        // Node numbering starts at 1, so slot 0 on node 1 is a valid id.
        let id = BucketId::new(1, 0);
        assert!(!id.is_null());
    }

    #[test]
    fn test_blob_id_swap_sign() {
        let plain = BlobId::from_parts(5, 42, false);
        let swapped = BlobId::from_parts(5, 42, true);

        assert!(!plain.is_in_swap());
        assert!(swapped.is_in_swap());
        assert_eq!(plain.home_node(), 5);
        assert_eq!(swapped.home_node(), 5);
        assert_eq!(plain.buffer_ids_offset(), 42);
        assert_eq!(swapped.buffer_ids_offset(), 42);
        assert!(swapped.signed_node() < 0);
    }

    #[test]
    fn test_blob_home_node_invariant_under_swap_flag() {
        for node in [1u32, 2, 100, i32::MAX as u32] {
            let a = BlobId::from_parts(node, 7, false);
            let b = BlobId::from_parts(node, 7, true);
            assert_eq!(a.home_node(), b.home_node());
        }
    }

    #[test]
    fn test_target_id_packing() {
        let id = TargetId::new(2, 3, 1);
        assert_eq!(id.node_id(), 2);
        assert_eq!(id.device_id(), 3);
        assert_eq!(id.index(), 1);
    }
}
