//! Shared-memory layout of the metadata manager.
//!
//! The region starts with the [`MdmHeader`]; every other structure sits at a
//! positive offset recorded in the header. Nothing stores an address. Fields
//! written after init are atomic so that concurrent mapped processes read
//! defined values; compound invariants (free list shape, slot counters) are
//! protected by the table ticket mutexes.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use tierbuf_shm::{ShmValue, TicketMutex};

/// First eight bytes of a metadata region.
pub const MDM_MAGIC: u64 = u64::from_le_bytes(*b"TBUFMDM\0");

/// Layout version; bump on any incompatible change to these structs.
pub const MDM_VERSION: u32 = 1;

/// Trait slots carried by every vbucket.
pub const MAX_TRAITS_PER_VBUCKET: usize = 8;

/// Region header, at offset 0.
#[repr(C)]
pub struct MdmHeader {
    pub magic: AtomicU64,
    pub version: AtomicU32,
    pub node_id: AtomicU32,
    pub num_nodes: AtomicU32,
    pub map_seed: AtomicU32,
    pub global_view_node_id: AtomicU32,
    _pad: u32,
    pub svs_update_interval_ms: AtomicU64,

    pub bucket_mutex: TicketMutex,
    pub vbucket_mutex: TicketMutex,

    pub first_free_bucket: AtomicU64,
    pub num_buckets: AtomicU32,
    pub max_buckets: AtomicU32,
    pub first_free_vbucket: AtomicU64,
    pub num_vbuckets: AtomicU32,
    pub max_vbuckets: AtomicU32,

    pub bucket_info_offset: AtomicU64,
    pub vbucket_info_offset: AtomicU64,
    pub system_view_state_offset: AtomicU64,
    /// Nonzero only on the node holding the authoritative global view.
    pub global_system_view_state_offset: AtomicU64,
    pub swap_prefix_offset: AtomicU64,
    pub swap_suffix_offset: AtomicU64,
    pub swap_prefix_len: AtomicU32,
    pub swap_suffix_len: AtomicU32,
    pub id_heap_offset: AtomicU64,
}

// SAFETY: repr(C), atomics and a region-resident mutex only, valid zeroed.
unsafe impl ShmValue for MdmHeader {}

/// Variable-length list of 64-bit ids, stored as a chunk in the id heap.
/// Mutated only under the owning table's mutex.
#[repr(C)]
pub struct IdList {
    pub chunk_offset: AtomicU64,
    pub length: AtomicU32,
    pub capacity: AtomicU32,
}

// SAFETY: repr(C), atomics only, zeroed means empty.
unsafe impl ShmValue for IdList {}

/// Opaque per-slot statistics, cleared when a slot is allocated.
#[repr(C)]
pub struct SlotStats {
    pub puts: AtomicU64,
    pub gets: AtomicU64,
}

// SAFETY: repr(C), atomics only.
unsafe impl ShmValue for SlotStats {}

/// One bucket slot.
#[repr(C)]
pub struct BucketSlot {
    /// Nonzero while the slot is in use.
    pub active: AtomicU32,
    /// Live handles to this bucket.
    pub ref_count: AtomicI32,
    /// Next free slot (a raw `BucketId`) while `active == 0`.
    pub next_free: AtomicU64,
    /// Membership list of `BlobId`s, in insertion order.
    pub blobs: IdList,
    pub stats: SlotStats,
}

// SAFETY: repr(C) aggregate of ShmValue fields.
unsafe impl ShmValue for BucketSlot {}

/// One vbucket slot. Same shape as a bucket plus the trait table.
#[repr(C)]
pub struct VBucketSlot {
    pub active: AtomicU32,
    pub ref_count: AtomicI32,
    pub next_free: AtomicU64,
    pub blobs: IdList,
    pub stats: SlotStats,
    /// Attached traits; zero-filled on allocation.
    pub traits: [AtomicU64; MAX_TRAITS_PER_VBUCKET],
}

// SAFETY: repr(C) aggregate of ShmValue fields.
unsafe impl ShmValue for VBucketSlot {}

/// Per-device byte availability. The `AtomicI64` cell array of
/// `num_devices` entries follows this struct directly in the region; the
/// alignment keeps the cell array at exactly `size_of::<SystemViewState>()`
/// past the struct offset.
#[repr(C, align(8))]
pub struct SystemViewState {
    pub num_devices: AtomicU32,
    _pad: u32,
}

// SAFETY: repr(C), atomic plus padding.
unsafe impl ShmValue for SystemViewState {}

impl SlotStats {
    /// Reset on slot allocation.
    pub fn clear(&self) {
        self.puts.store(0, Ordering::Relaxed);
        self.gets.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes_are_stable() {
        // The cell array following SystemViewState must stay 8-aligned.
        assert_eq!(std::mem::size_of::<SystemViewState>() % 8, 0);
        assert_eq!(std::mem::align_of::<MdmHeader>() % 4, 0);
        assert_eq!(std::mem::size_of::<IdList>(), 16);
    }
}
