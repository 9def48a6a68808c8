//! The per-node metadata manager.
//!
//! [`MetadataManager`] owns one node's metadata region and provides typed
//! access to the structures laid out in it: the slot tables with their free
//! lists, the system view states, the swap file name parts, and the id heap
//! backing slot membership lists. It performs no sharding or dispatch; that
//! is the service layer's job.

use crate::error::{MetadataError, Result};
use crate::layout::{
    BucketSlot, IdList, MdmHeader, SystemViewState, VBucketSlot, MDM_MAGIC, MDM_VERSION,
};
use crate::storage::MAP_SEED;
use std::sync::atomic::{AtomicI64, Ordering};
use tierbuf_common::{BucketId, Config, VBucketId};
use tierbuf_shm::{ArenaWriter, IdHeap, IdHeapHeader, Region, ShmError};
use tracing::error;

/// Smallest workable id heap; below this the region cannot hold even a
/// handful of membership lists.
const MIN_HEAP_BYTES: usize = 4096;

/// Abort on id-heap exhaustion. Offsets into the region stay valid, but the
/// node can no longer record memberships, and every process mapping the
/// region would observe the stall.
pub(crate) fn metadata_arena_exhausted(err: &ShmError) -> ! {
    error!(
        %err,
        "metadata arena capacity exceeded; increase metadata_arena_percentage \
         in the tierbuf configuration"
    );
    panic!("metadata arena capacity exceeded");
}

/// One node's metadata region, initialized or attached.
pub struct MetadataManager {
    region: Region,
}

impl MetadataManager {
    /// Lay out and initialize a fresh region from `config`.
    pub fn init(region: Region, config: &Config) -> Result<Self> {
        let node_id = config.cluster.node_id;

        let mut writer = ArenaWriter::new(&region, 0);
        let header_offset = writer.push_struct::<MdmHeader>()?;
        debug_assert_eq!(header_offset, 0);

        let svs_offset = Self::push_system_view(&region, &mut writer, config)?;
        let global_svs_offset = if node_id == config.cluster.global_view_node_id {
            Self::push_system_view(&region, &mut writer, config)?
        } else {
            0
        };

        let max_buckets = config.metadata.max_buckets_per_node;
        let bucket_info_offset = writer.push_array::<BucketSlot>(max_buckets as usize)?;
        let max_vbuckets = config.metadata.max_vbuckets_per_node;
        let vbucket_info_offset = writer.push_array::<VBucketSlot>(max_vbuckets as usize)?;

        let swap_prefix = config.swap.filename_prefix.as_bytes();
        let swap_suffix = config.swap.filename_suffix.as_bytes();
        let swap_prefix_offset = writer.push_bytes(swap_prefix)?;
        let swap_suffix_offset = writer.push_bytes(swap_suffix)?;

        let available = region.size().saturating_sub(writer.used());
        let heap_bytes = available.saturating_sub(std::mem::size_of::<IdHeapHeader>() + 64);
        if heap_bytes < MIN_HEAP_BYTES {
            return Err(MetadataError::Shm(ShmError::RegionTooSmall {
                size: region.size(),
                min: writer.used() + MIN_HEAP_BYTES,
            }));
        }
        let id_heap_offset = IdHeap::init(&region, &mut writer, heap_bytes)?;

        let header = region.at::<MdmHeader>(0);
        header.version.store(MDM_VERSION, Ordering::Relaxed);
        header.node_id.store(node_id, Ordering::Relaxed);
        header.num_nodes.store(config.num_nodes(), Ordering::Relaxed);
        header.map_seed.store(MAP_SEED, Ordering::Relaxed);
        header
            .global_view_node_id
            .store(config.cluster.global_view_node_id, Ordering::Relaxed);
        header.svs_update_interval_ms.store(
            config.metadata.system_view_state_update_interval_ms,
            Ordering::Relaxed,
        );

        header.max_buckets.store(max_buckets, Ordering::Relaxed);
        header.max_vbuckets.store(max_vbuckets, Ordering::Relaxed);
        header
            .bucket_info_offset
            .store(bucket_info_offset, Ordering::Relaxed);
        header
            .vbucket_info_offset
            .store(vbucket_info_offset, Ordering::Relaxed);
        header
            .system_view_state_offset
            .store(svs_offset, Ordering::Relaxed);
        header
            .global_system_view_state_offset
            .store(global_svs_offset, Ordering::Relaxed);
        header
            .swap_prefix_offset
            .store(swap_prefix_offset, Ordering::Relaxed);
        header
            .swap_suffix_offset
            .store(swap_suffix_offset, Ordering::Relaxed);
        header
            .swap_prefix_len
            .store(swap_prefix.len() as u32, Ordering::Relaxed);
        header
            .swap_suffix_len
            .store(swap_suffix.len() as u32, Ordering::Relaxed);
        header.id_heap_offset.store(id_heap_offset, Ordering::Relaxed);

        // Thread the slot free lists: slot i points at slot i + 1, the last
        // slot terminates with the NULL id.
        let buckets = region.slice::<BucketSlot>(bucket_info_offset, max_buckets as usize);
        for (i, slot) in buckets.iter().enumerate() {
            let next = if i as u32 == max_buckets - 1 {
                BucketId::NULL
            } else {
                BucketId::new(node_id, i as u32 + 1)
            };
            slot.next_free.store(next.as_u64(), Ordering::Relaxed);
        }
        header
            .first_free_bucket
            .store(BucketId::new(node_id, 0).as_u64(), Ordering::Relaxed);

        let vbuckets = region.slice::<VBucketSlot>(vbucket_info_offset, max_vbuckets as usize);
        for (i, slot) in vbuckets.iter().enumerate() {
            let next = if i as u32 == max_vbuckets - 1 {
                VBucketId::NULL
            } else {
                VBucketId::new(node_id, i as u32 + 1)
            };
            slot.next_free.store(next.as_u64(), Ordering::Relaxed);
        }
        header
            .first_free_vbucket
            .store(VBucketId::new(node_id, 0).as_u64(), Ordering::Relaxed);

        // Publish last; attachers check the magic before touching anything.
        header.magic.store(MDM_MAGIC, Ordering::Release);

        Ok(Self { region })
    }

    fn push_system_view(
        region: &Region,
        writer: &mut ArenaWriter<'_>,
        config: &Config,
    ) -> Result<u64> {
        let offset = writer.push_struct::<SystemViewState>()?;
        let cells_offset = writer.push_array::<AtomicI64>(config.devices.num_devices as usize)?;
        debug_assert_eq!(
            cells_offset,
            offset + std::mem::size_of::<SystemViewState>() as u64
        );

        let svs = region.at::<SystemViewState>(offset);
        svs.num_devices
            .store(config.devices.num_devices, Ordering::Relaxed);
        let cells =
            region.slice::<AtomicI64>(cells_offset, config.devices.num_devices as usize);
        for (cell, &capacity) in cells.iter().zip(&config.devices.capacities) {
            cell.store(capacity as i64, Ordering::Relaxed);
        }
        Ok(offset)
    }

    /// Attach to a region previously initialized by [`MetadataManager::init`].
    pub fn attach(region: Region) -> Result<Self> {
        if region.size() < std::mem::size_of::<MdmHeader>() {
            return Err(MetadataError::InvalidRegion);
        }
        let header = region.at::<MdmHeader>(0);
        if header.magic.load(Ordering::Acquire) != MDM_MAGIC
            || header.version.load(Ordering::Relaxed) != MDM_VERSION
        {
            return Err(MetadataError::InvalidRegion);
        }
        Ok(Self { region })
    }

    /// Create and initialize this node's shared memory region, named
    /// `shmem_name_prefix || node_id`.
    pub fn create_node(config: &Config) -> Result<Self> {
        let name = Self::shmem_name(config);
        let region = Region::create_shm(&name, config.metadata_arena_bytes())?;
        Self::init(region, config)
    }

    /// Attach to this node's existing shared memory region.
    pub fn attach_node(config: &Config) -> Result<Self> {
        let name = Self::shmem_name(config);
        let region = Region::open_shm(&name, config.metadata_arena_bytes())?;
        Self::attach(region)
    }

    /// Initialize in an anonymous (process-local) region.
    pub fn create_in_memory(config: &Config) -> Result<Self> {
        let region = Region::anonymous(config.metadata_arena_bytes())?;
        Self::init(region, config)
    }

    /// Shared memory segment name for this node.
    #[must_use]
    pub fn shmem_name(config: &Config) -> String {
        format!(
            "{}{}",
            config.metadata.shmem_name_prefix, config.cluster.node_id
        )
    }

    /// The region header.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &MdmHeader {
        self.region.at::<MdmHeader>(0)
    }

    /// This node's id.
    #[must_use]
    pub fn node_id(&self) -> u32 {
        self.header().node_id.load(Ordering::Relaxed)
    }

    /// Cluster size recorded at init.
    #[must_use]
    pub fn num_nodes(&self) -> u32 {
        self.header().num_nodes.load(Ordering::Relaxed)
    }

    /// Node holding the authoritative global system view.
    #[must_use]
    pub fn global_view_node_id(&self) -> u32 {
        self.header().global_view_node_id.load(Ordering::Relaxed)
    }

    /// Configured update interval for global view flushes.
    #[must_use]
    pub fn svs_update_interval_ms(&self) -> u64 {
        self.header().svs_update_interval_ms.load(Ordering::Relaxed)
    }

    // Slot tables

    /// Bucket slot at `index`.
    #[must_use]
    pub fn bucket_slot(&self, index: u32) -> &BucketSlot {
        let header = self.header();
        let offset = header.bucket_info_offset.load(Ordering::Relaxed);
        let max = header.max_buckets.load(Ordering::Relaxed) as usize;
        &self.region.slice::<BucketSlot>(offset, max)[index as usize]
    }

    /// VBucket slot at `index`.
    #[must_use]
    pub fn vbucket_slot(&self, index: u32) -> &VBucketSlot {
        let header = self.header();
        let offset = header.vbucket_info_offset.load(Ordering::Relaxed);
        let max = header.max_vbuckets.load(Ordering::Relaxed) as usize;
        &self.region.slice::<VBucketSlot>(offset, max)[index as usize]
    }

    /// Number of active buckets.
    #[must_use]
    pub fn num_buckets(&self) -> u32 {
        self.header().num_buckets.load(Ordering::Relaxed)
    }

    /// Bucket table capacity.
    #[must_use]
    pub fn max_buckets(&self) -> u32 {
        self.header().max_buckets.load(Ordering::Relaxed)
    }

    /// Number of active vbuckets.
    #[must_use]
    pub fn num_vbuckets(&self) -> u32 {
        self.header().num_vbuckets.load(Ordering::Relaxed)
    }

    /// VBucket table capacity.
    #[must_use]
    pub fn max_vbuckets(&self) -> u32 {
        self.header().max_vbuckets.load(Ordering::Relaxed)
    }

    /// Walk the bucket free list. Diagnostic; take the bucket mutex or
    /// quiesce writers first.
    #[must_use]
    pub fn bucket_free_list(&self) -> Vec<BucketId> {
        let mut result = Vec::new();
        let mut id = BucketId::from_u64(self.header().first_free_bucket.load(Ordering::Relaxed));
        while !id.is_null() {
            result.push(id);
            let slot = self.bucket_slot(id.index());
            id = BucketId::from_u64(slot.next_free.load(Ordering::Relaxed));
        }
        result
    }

    /// Walk the vbucket free list. Same caveats as [`Self::bucket_free_list`].
    #[must_use]
    pub fn vbucket_free_list(&self) -> Vec<VBucketId> {
        let mut result = Vec::new();
        let mut id = VBucketId::from_u64(self.header().first_free_vbucket.load(Ordering::Relaxed));
        while !id.is_null() {
            result.push(id);
            let slot = self.vbucket_slot(id.index());
            id = VBucketId::from_u64(slot.next_free.load(Ordering::Relaxed));
        }
        result
    }

    // System view states

    fn system_view_at(&self, offset: u64) -> &[AtomicI64] {
        let svs = self.region.at::<SystemViewState>(offset);
        let n = svs.num_devices.load(Ordering::Relaxed) as usize;
        self.region
            .slice::<AtomicI64>(offset + std::mem::size_of::<SystemViewState>() as u64, n)
    }

    /// This node's local per-device availability cells.
    #[must_use]
    pub fn local_system_view(&self) -> &[AtomicI64] {
        let offset = self.header().system_view_state_offset.load(Ordering::Relaxed);
        self.system_view_at(offset)
    }

    /// The authoritative global availability cells; present only on the
    /// global view node.
    #[must_use]
    pub fn global_system_view(&self) -> Option<&[AtomicI64]> {
        let offset = self
            .header()
            .global_system_view_state_offset
            .load(Ordering::Relaxed);
        (offset != 0).then(|| self.system_view_at(offset))
    }

    // Id heap and membership lists

    fn heap(&self) -> IdHeap<'_> {
        IdHeap::attach(
            &self.region,
            self.header().id_heap_offset.load(Ordering::Relaxed),
        )
    }

    /// Append `id` to `list`, growing its chunk as needed. Caller holds the
    /// owning table's mutex.
    pub fn list_append(&self, list: &IdList, id: u64) {
        let len = list.length.load(Ordering::Relaxed);
        let cap = list.capacity.load(Ordering::Relaxed);
        let heap = self.heap();

        if len == cap {
            let (new_chunk, new_cap) = heap
                .allocate(len + 1)
                .unwrap_or_else(|err| metadata_arena_exhausted(&err));
            if cap > 0 {
                let old_chunk = list.chunk_offset.load(Ordering::Relaxed);
                let old = heap.ids(old_chunk, len);
                let new = heap.ids(new_chunk, len);
                for (dst, src) in new.iter().zip(old) {
                    dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
                }
                heap.free(old_chunk, cap);
            }
            list.chunk_offset.store(new_chunk, Ordering::Relaxed);
            list.capacity.store(new_cap, Ordering::Relaxed);
        }

        let chunk = list.chunk_offset.load(Ordering::Relaxed);
        heap.ids(chunk, len + 1)[len as usize].store(id, Ordering::Relaxed);
        list.length.store(len + 1, Ordering::Relaxed);
    }

    /// Remove the first occurrence of `id` from `list`, preserving order.
    /// Caller holds the owning table's mutex.
    pub fn list_remove(&self, list: &IdList, id: u64) -> bool {
        let len = list.length.load(Ordering::Relaxed) as usize;
        if len == 0 {
            return false;
        }
        let chunk = list.chunk_offset.load(Ordering::Relaxed);
        let heap = self.heap();
        let ids = heap.ids(chunk, len as u32);
        let Some(pos) = (0..len).find(|&i| ids[i].load(Ordering::Relaxed) == id) else {
            return false;
        };
        for i in pos..len - 1 {
            ids[i].store(ids[i + 1].load(Ordering::Relaxed), Ordering::Relaxed);
        }
        list.length.store(len as u32 - 1, Ordering::Relaxed);
        true
    }

    /// Whether `list` contains `id`. Caller holds the owning table's mutex.
    #[must_use]
    pub fn list_contains(&self, list: &IdList, id: u64) -> bool {
        let len = list.length.load(Ordering::Relaxed);
        if len == 0 {
            return false;
        }
        let chunk = list.chunk_offset.load(Ordering::Relaxed);
        self.heap()
            .ids(chunk, len)
            .iter()
            .any(|word| word.load(Ordering::Relaxed) == id)
    }

    /// Copy `list` out. Caller holds the owning table's mutex.
    #[must_use]
    pub fn list_to_vec(&self, list: &IdList) -> Vec<u64> {
        let len = list.length.load(Ordering::Relaxed);
        if len == 0 {
            return Vec::new();
        }
        let chunk = list.chunk_offset.load(Ordering::Relaxed);
        self.heap()
            .ids(chunk, len)
            .iter()
            .map(|word| word.load(Ordering::Relaxed))
            .collect()
    }

    /// Empty `list`, returning its chunk to the heap. Caller holds the
    /// owning table's mutex.
    pub fn list_clear(&self, list: &IdList) {
        let cap = list.capacity.load(Ordering::Relaxed);
        if cap > 0 {
            self.heap()
                .free(list.chunk_offset.load(Ordering::Relaxed), cap);
        }
        list.chunk_offset.store(0, Ordering::Relaxed);
        list.length.store(0, Ordering::Relaxed);
        list.capacity.store(0, Ordering::Relaxed);
    }

    // Swap file names

    /// Swap file path for `node_id`: `prefix || decimal(node_id) || suffix`.
    #[must_use]
    pub fn swap_filename(&self, node_id: u32) -> String {
        let header = self.header();
        let prefix = self.region.bytes(
            header.swap_prefix_offset.load(Ordering::Relaxed),
            header.swap_prefix_len.load(Ordering::Relaxed) as usize,
        );
        let suffix = self.region.bytes(
            header.swap_suffix_offset.load(Ordering::Relaxed),
            header.swap_suffix_len.load(Ordering::Relaxed) as usize,
        );
        format!(
            "{}{}{}",
            String::from_utf8_lossy(prefix),
            node_id,
            String::from_utf8_lossy(suffix)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.metadata.shared_memory_bytes = 4 * 1024 * 1024;
        config.metadata.max_buckets_per_node = 8;
        config.metadata.max_vbuckets_per_node = 4;
        config.devices.num_devices = 2;
        config.devices.capacities = vec![100, 200];
        config
    }

    #[test]
    fn test_init_builds_full_free_lists() {
        let mdm = MetadataManager::create_in_memory(&test_config()).unwrap();

        assert_eq!(mdm.node_id(), 1);
        assert_eq!(mdm.num_buckets(), 0);
        let free = mdm.bucket_free_list();
        assert_eq!(free.len(), 8);
        assert_eq!(free[0], BucketId::new(1, 0));
        assert_eq!(free[7], BucketId::new(1, 7));
        assert_eq!(mdm.vbucket_free_list().len(), 4);
    }

    #[test]
    fn test_init_seeds_system_views() {
        let mdm = MetadataManager::create_in_memory(&test_config()).unwrap();

        let local: Vec<i64> = mdm
            .local_system_view()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        assert_eq!(local, vec![100, 200]);

        // Node 1 is the global view node by default.
        let global = mdm.global_system_view().expect("global view on node 1");
        assert_eq!(global.len(), 2);
    }

    #[test]
    fn test_non_coordinator_has_no_global_view() {
        let mut config = test_config();
        config.cluster.node_id = 2;
        config.cluster.peers = vec!["a:1".into(), "b:1".into()];
        let mdm = MetadataManager::create_in_memory(&config).unwrap();
        assert!(mdm.global_system_view().is_none());
    }

    #[test]
    fn test_swap_filename_concatenation() {
        let mdm = MetadataManager::create_in_memory(&test_config()).unwrap();
        assert_eq!(mdm.swap_filename(3), "tierbuf_swap_3.dat");
    }

    #[test]
    fn test_list_append_remove_preserves_order() {
        let mdm = MetadataManager::create_in_memory(&test_config()).unwrap();
        let slot = mdm.bucket_slot(0);

        for id in 1..=20u64 {
            mdm.list_append(&slot.blobs, id);
        }
        assert!(mdm.list_contains(&slot.blobs, 13));
        assert!(mdm.list_remove(&slot.blobs, 13));
        assert!(!mdm.list_contains(&slot.blobs, 13));

        let expected: Vec<u64> = (1..=20).filter(|&id| id != 13).collect();
        assert_eq!(mdm.list_to_vec(&slot.blobs), expected);

        mdm.list_clear(&slot.blobs);
        assert_eq!(mdm.list_to_vec(&slot.blobs), Vec::<u64>::new());
    }

    #[test]
    fn test_attach_over_shared_memory() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        let mut config = test_config();
        config.metadata.shmem_name_prefix = format!("/tierbuf_test_attach_{ts}_");

        let creator = MetadataManager::create_node(&config).unwrap();
        creator.bucket_slot(0).ref_count.store(7, Ordering::Relaxed);

        let attacher = MetadataManager::attach_node(&config).unwrap();
        assert_eq!(attacher.node_id(), 1);
        assert_eq!(
            attacher.bucket_slot(0).ref_count.load(Ordering::Relaxed),
            7
        );

        drop(attacher);
        drop(creator);
        tierbuf_shm::ShmSegment::unlink(&MetadataManager::shmem_name(&config)).ok();
    }

    #[test]
    fn test_attach_rejects_garbage_region() {
        let region = Region::anonymous(1 << 20).unwrap();
        assert!(matches!(
            MetadataManager::attach(region),
            Err(MetadataError::InvalidRegion)
        ));
    }
}
