//! Buffer pool collaborator interface.
//!
//! The buffer pool owns the buffers and the buffer-id lists; the metadata
//! manager holds only a `u32` offset per blob (packed into the low half of
//! the blob id) and goes through this trait for everything else. The calls
//! are node-local: the service dispatches to the owning node first, then
//! invokes the trait on that node's pool.
//!
//! [`MemoryBufferPool`] is the in-process implementation used by tests and
//! single-node deployments; a real pool lives in its own shared memory
//! segment and implements the same trait.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use tierbuf_common::config::DeviceConfig;
use tierbuf_common::{BufferId, DeviceId, TargetId};

/// Node-local buffer pool operations the metadata manager depends on.
pub trait BufferPool: Send + Sync {
    /// Store `buffer_ids` as a new list and return its offset.
    fn allocate_buffer_id_list(&self, buffer_ids: &[BufferId]) -> u32;

    /// The list at `offset`; empty if unknown.
    fn buffer_id_list(&self, offset: u32) -> Vec<BufferId>;

    /// Drop the list at `offset`.
    fn free_buffer_id_list(&self, offset: u32);

    /// Return buffers to the pool free lists; their data is abandoned.
    fn release_buffers(&self, buffer_ids: &[BufferId]);

    /// Usable size of one buffer in bytes.
    fn buffer_size(&self, id: BufferId) -> u64;

    /// The storage targets this node exposes.
    fn node_targets(&self) -> Vec<TargetId>;

    /// Remaining capacity of one of this node's targets, in bytes.
    fn remaining_target_capacity(&self, id: TargetId) -> u64;

    /// Atomically drain the pending per-device capacity deltas, leaving
    /// zeros behind.
    fn take_capacity_adjustments(&self) -> Vec<i64>;

    /// Record a capacity delta for `device`, to be flushed to the global
    /// view on the next update.
    fn adjust_capacity(&self, device: DeviceId, delta: i64);
}

/// In-process buffer pool double. Tracks enough state to honor the trait
/// and to let tests assert release/free behavior.
pub struct MemoryBufferPool {
    targets: Vec<TargetId>,
    remaining: Vec<AtomicU64>,
    capacity_adjustments: Vec<AtomicI64>,
    buffer_bytes: u64,
    next_offset: AtomicU32,
    lists: Mutex<HashMap<u32, Vec<BufferId>>>,
    release_counts: Mutex<HashMap<BufferId, u32>>,
    freed_lists: Mutex<HashMap<u32, u32>>,
}

impl MemoryBufferPool {
    /// Default buffer size reported for every buffer.
    pub const DEFAULT_BUFFER_BYTES: u64 = 4096;

    /// Create a pool for `node_id` with one target per configured device.
    #[must_use]
    pub fn new(node_id: u32, devices: &DeviceConfig) -> Self {
        let targets = (0..devices.num_devices)
            .map(|d| TargetId::new(node_id, d as DeviceId, d as u16))
            .collect();
        let remaining = devices
            .capacities
            .iter()
            .map(|&c| AtomicU64::new(c))
            .collect();
        let capacity_adjustments = (0..devices.num_devices).map(|_| AtomicI64::new(0)).collect();
        Self {
            targets,
            remaining,
            capacity_adjustments,
            buffer_bytes: Self::DEFAULT_BUFFER_BYTES,
            next_offset: AtomicU32::new(1),
            lists: Mutex::new(HashMap::new()),
            release_counts: Mutex::new(HashMap::new()),
            freed_lists: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `id` has been released.
    #[must_use]
    pub fn release_count(&self, id: BufferId) -> u32 {
        self.release_counts.lock().get(&id).copied().unwrap_or(0)
    }

    /// How many times the list at `offset` has been freed.
    #[must_use]
    pub fn freed_list_count(&self, offset: u32) -> u32 {
        self.freed_lists.lock().get(&offset).copied().unwrap_or(0)
    }
}

impl BufferPool for MemoryBufferPool {
    fn allocate_buffer_id_list(&self, buffer_ids: &[BufferId]) -> u32 {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        self.lists.lock().insert(offset, buffer_ids.to_vec());
        offset
    }

    fn buffer_id_list(&self, offset: u32) -> Vec<BufferId> {
        self.lists.lock().get(&offset).cloned().unwrap_or_default()
    }

    fn free_buffer_id_list(&self, offset: u32) {
        self.lists.lock().remove(&offset);
        *self.freed_lists.lock().entry(offset).or_insert(0) += 1;
    }

    fn release_buffers(&self, buffer_ids: &[BufferId]) {
        let mut counts = self.release_counts.lock();
        for &id in buffer_ids {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    fn buffer_size(&self, _id: BufferId) -> u64 {
        self.buffer_bytes
    }

    fn node_targets(&self) -> Vec<TargetId> {
        self.targets.clone()
    }

    fn remaining_target_capacity(&self, id: TargetId) -> u64 {
        self.targets
            .iter()
            .position(|&t| t == id)
            .map_or(0, |i| self.remaining[i].load(Ordering::Relaxed))
    }

    fn take_capacity_adjustments(&self) -> Vec<i64> {
        self.capacity_adjustments
            .iter()
            .map(|cell| cell.swap(0, Ordering::Relaxed))
            .collect()
    }

    fn adjust_capacity(&self, device: DeviceId, delta: i64) {
        if let Some(cell) = self.capacity_adjustments.get(device as usize) {
            cell.fetch_add(delta, Ordering::Relaxed);
        }
        if let Some(remaining) = self.remaining.get(device as usize) {
            let updated = remaining.load(Ordering::Relaxed) as i64 + delta;
            remaining.store(updated.max(0) as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> DeviceConfig {
        DeviceConfig {
            num_devices: 2,
            capacities: vec![100, 200],
        }
    }

    #[test]
    fn test_list_lifecycle() {
        let pool = MemoryBufferPool::new(1, &devices());
        let ids = vec![BufferId::new(1, 1), BufferId::new(1, 2)];

        let offset = pool.allocate_buffer_id_list(&ids);
        assert!(offset > 0);
        assert_eq!(pool.buffer_id_list(offset), ids);

        pool.free_buffer_id_list(offset);
        assert!(pool.buffer_id_list(offset).is_empty());
        assert_eq!(pool.freed_list_count(offset), 1);
    }

    #[test]
    fn test_release_counting() {
        let pool = MemoryBufferPool::new(1, &devices());
        let id = BufferId::new(1, 9);
        pool.release_buffers(&[id]);
        assert_eq!(pool.release_count(id), 1);
        assert_eq!(pool.release_count(BufferId::new(1, 10)), 0);
    }

    #[test]
    fn test_targets_track_devices() {
        let pool = MemoryBufferPool::new(3, &devices());
        let targets = pool.node_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].node_id(), 3);
        assert_eq!(targets[1].device_id(), 1);
        assert_eq!(pool.remaining_target_capacity(targets[1]), 200);
        assert_eq!(pool.remaining_target_capacity(TargetId::new(9, 0, 0)), 0);
    }

    #[test]
    fn test_adjustments_drain_to_zero() {
        let pool = MemoryBufferPool::new(1, &devices());
        pool.adjust_capacity(0, -10);
        pool.adjust_capacity(1, 5);
        pool.adjust_capacity(0, 3);

        assert_eq!(pool.take_capacity_adjustments(), vec![-7, 5]);
        assert_eq!(pool.take_capacity_adjustments(), vec![0, 0]);
        assert_eq!(pool.remaining_target_capacity(pool.node_targets()[0]), 93);
    }
}
