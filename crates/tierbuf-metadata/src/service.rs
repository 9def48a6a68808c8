//! Metadata operations with transparent local-or-remote routing.
//!
//! Every public operation computes a target node first: name-keyed
//! operations hash the name, id-keyed operations read the node embedded in
//! the id, global view operations go to the configured global view node. If
//! the target is this node the operation runs against local shared memory
//! under the right lock; otherwise the arguments ship to the target's
//! `local_*` twin over RPC. The `local_*` methods are the remote handler
//! surface, wired up through the [`RpcHandler`] implementation at the bottom
//! of this file.
//!
//! Blob ids embed the node chosen by hashing the blob's *user-visible* name,
//! and the blob's map entry lives on that same node (the internal,
//! bucket-prefixed name is only the map key). That keeps every id-keyed blob
//! operation on the node that also holds the name binding.

use crate::error::Result;
use crate::manager::MetadataManager;
use crate::pool::BufferPool;
use crate::storage::NameStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tierbuf_common::{
    is_blob_name_too_long, is_bucket_name_too_long, is_vbucket_name_too_long,
    make_internal_blob_name, naming, BlobId, BucketId, BufferId, Error as CommonError, MapType,
    VBucketId, BUCKET_ID_HEX_LEN,
};
use tierbuf_rpc::{Request, Response, Rpc, RpcHandler};
use tracing::{debug, error, info, warn};

/// One node's metadata service: the shared-memory manager plus its
/// collaborators and the cluster transport.
pub struct MetadataService {
    mdm: MetadataManager,
    store: Arc<dyn NameStore>,
    pool: Arc<dyn BufferPool>,
    rpc: Arc<dyn Rpc>,
}

impl MetadataService {
    /// Assemble a service. `mdm` must have been initialized for the same
    /// node id the transport reports.
    #[must_use]
    pub fn new(
        mdm: MetadataManager,
        store: Arc<dyn NameStore>,
        pool: Arc<dyn BufferPool>,
        rpc: Arc<dyn Rpc>,
    ) -> Self {
        debug_assert_eq!(mdm.node_id(), rpc.node_id());
        Self {
            mdm,
            store,
            pool,
            rpc,
        }
    }

    /// This node's id.
    #[must_use]
    pub fn node_id(&self) -> u32 {
        self.rpc.node_id()
    }

    /// Cluster size.
    #[must_use]
    pub fn num_nodes(&self) -> u32 {
        self.rpc.num_nodes()
    }

    /// The shared-memory manager (introspection and data-plane hooks).
    #[must_use]
    pub fn manager(&self) -> &MetadataManager {
        &self.mdm
    }

    /// This node's buffer pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn BufferPool> {
        &self.pool
    }

    pub(crate) fn rpc(&self) -> &Arc<dyn Rpc> {
        &self.rpc
    }

    fn is_local(&self, target_node: u32) -> bool {
        target_node == self.rpc.node_id()
    }

    /// The node responsible for `name`: seeded hash folded into [1..N].
    #[must_use]
    pub fn hash_name(&self, name: &str) -> u32 {
        (self.store.hash_name(name) % u64::from(self.rpc.num_nodes())) as u32 + 1
    }

    // ------------------------------------------------------------------
    // Name-map facade
    // ------------------------------------------------------------------

    /// Insert `key -> id` into this node's shard of `map`.
    pub fn local_put(&self, key: &str, id: u64, map: MapType) {
        self.store.put(key, id, map);
    }

    /// Look `key` up in this node's shard of `map`; 0 if absent.
    #[must_use]
    pub fn local_get(&self, key: &str, map: MapType) -> u64 {
        self.store.get(key, map)
    }

    /// Delete `key` from this node's shard of `map`.
    pub fn local_delete(&self, key: &str, map: MapType) {
        self.store.delete(key, map);
    }

    fn put_id(&self, target_node: u32, key: String, id: u64, map: MapType) -> Result<()> {
        if self.is_local(target_node) {
            self.local_put(&key, id, map);
            Ok(())
        } else {
            self.rpc
                .call(target_node, Request::Put { key, id, map })?
                .into_bool()?;
            Ok(())
        }
    }

    fn get_id(&self, target_node: u32, key: String, map: MapType) -> Result<u64> {
        if self.is_local(target_node) {
            Ok(self.local_get(&key, map))
        } else {
            Ok(self
                .rpc
                .call(target_node, Request::Get { key, map })?
                .into_u64()?)
        }
    }

    fn delete_id(&self, target_node: u32, key: String, map: MapType) -> Result<()> {
        if self.is_local(target_node) {
            self.local_delete(&key, map);
            Ok(())
        } else {
            self.rpc
                .call(target_node, Request::Delete { key, map })?
                .into_bool()?;
            Ok(())
        }
    }

    /// Resolve a bucket name to its id; NULL if unknown.
    pub fn get_bucket_id(&self, name: &str) -> Result<BucketId> {
        let target = self.hash_name(name);
        Ok(BucketId::from_u64(self.get_id(
            target,
            name.to_string(),
            MapType::Bucket,
        )?))
    }

    /// Record a bucket name binding.
    pub fn put_bucket_id(&self, name: &str, id: BucketId) -> Result<()> {
        let target = self.hash_name(name);
        self.put_id(target, name.to_string(), id.as_u64(), MapType::Bucket)
    }

    /// Remove a bucket name binding.
    pub fn delete_bucket_id(&self, name: &str) -> Result<()> {
        let target = self.hash_name(name);
        self.delete_id(target, name.to_string(), MapType::Bucket)
    }

    /// Resolve a vbucket name to its id; NULL if unknown.
    pub fn get_vbucket_id(&self, name: &str) -> Result<VBucketId> {
        let target = self.hash_name(name);
        Ok(VBucketId::from_u64(self.get_id(
            target,
            name.to_string(),
            MapType::VBucket,
        )?))
    }

    /// Record a vbucket name binding.
    pub fn put_vbucket_id(&self, name: &str, id: VBucketId) -> Result<()> {
        let target = self.hash_name(name);
        self.put_id(target, name.to_string(), id.as_u64(), MapType::VBucket)
    }

    /// Remove a vbucket name binding.
    pub fn delete_vbucket_id(&self, name: &str) -> Result<()> {
        let target = self.hash_name(name);
        self.delete_id(target, name.to_string(), MapType::VBucket)
    }

    /// Resolve a blob name within `bucket_id`; NULL if unknown. The shard is
    /// chosen by the user-visible name, the key is the internal name.
    pub fn get_blob_id(&self, name: &str, bucket_id: BucketId) -> Result<BlobId> {
        let target = self.hash_name(name);
        let key = make_internal_blob_name(name, bucket_id);
        Ok(BlobId::from_u64(self.get_id(target, key, MapType::Blob)?))
    }

    /// Record a blob name binding.
    pub fn put_blob_id(&self, name: &str, blob_id: BlobId, bucket_id: BucketId) -> Result<()> {
        let target = self.hash_name(name);
        let key = make_internal_blob_name(name, bucket_id);
        self.put_id(target, key, blob_id.as_u64(), MapType::Blob)
    }

    /// Remove a blob name binding.
    pub fn delete_blob_id(&self, name: &str, bucket_id: BucketId) -> Result<()> {
        let target = self.hash_name(name);
        let key = make_internal_blob_name(name, bucket_id);
        self.delete_id(target, key, MapType::Blob)
    }

    // ------------------------------------------------------------------
    // Bucket and vbucket allocation
    // ------------------------------------------------------------------

    /// Take the next free bucket slot and bind it to `name`.
    ///
    /// Caller holds the bucket mutex.
    fn local_get_next_free_bucket_id(&self, name: &str) -> BucketId {
        let header = self.mdm.header();
        let mut result = BucketId::NULL;

        if header.num_buckets.load(Ordering::Relaxed) < header.max_buckets.load(Ordering::Relaxed)
        {
            result = BucketId::from_u64(header.first_free_bucket.load(Ordering::Relaxed));
            if !result.is_null() {
                let slot = self.mdm.bucket_slot(result.index());
                self.mdm.list_clear(&slot.blobs);
                slot.stats.clear();
                slot.ref_count.store(1, Ordering::Relaxed);
                slot.active.store(1, Ordering::Relaxed);
                header
                    .first_free_bucket
                    .store(slot.next_free.load(Ordering::Relaxed), Ordering::Relaxed);
                header.num_buckets.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            error!(
                "exceeded max allowed buckets; increase max_buckets_per_node \
                 in the tierbuf configuration"
            );
        }

        if !result.is_null() {
            self.local_put(name, result.as_u64(), MapType::Bucket);
        }
        result
    }

    /// Open `name` if it exists (bumping its refcount) or create it from the
    /// free list. NULL when the table is full.
    pub fn local_get_or_create_bucket_id(&self, name: &str) -> BucketId {
        let header = self.mdm.header();
        let _guard = header.bucket_mutex.lock();

        let existing = BucketId::from_u64(self.local_get(name, MapType::Bucket));
        if !existing.is_null() {
            info!(name, "opening bucket");
            self.local_increment_bucket_refcount(existing);
            existing
        } else {
            info!(name, "creating bucket");
            self.local_get_next_free_bucket_id(name)
        }
    }

    /// Open or create the bucket `name` on its shard node.
    pub fn get_or_create_bucket_id(&self, name: &str) -> Result<BucketId> {
        if is_bucket_name_too_long(name) {
            return Err(CommonError::NameTooLong {
                name: name.to_string(),
                max: naming::MAX_BUCKET_NAME_SIZE,
            }
            .into());
        }
        let target = self.hash_name(name);
        if self.is_local(target) {
            Ok(self.local_get_or_create_bucket_id(name))
        } else {
            Ok(self
                .rpc
                .call(
                    target,
                    Request::GetOrCreateBucketId {
                        name: name.to_string(),
                    },
                )?
                .into_bucket_id()?)
        }
    }

    /// Take the next free vbucket slot and bind it to `name`.
    ///
    /// Caller holds the vbucket mutex.
    fn local_get_next_free_vbucket_id(&self, name: &str) -> VBucketId {
        let header = self.mdm.header();
        let mut result = VBucketId::NULL;

        if header.num_vbuckets.load(Ordering::Relaxed)
            < header.max_vbuckets.load(Ordering::Relaxed)
        {
            result = VBucketId::from_u64(header.first_free_vbucket.load(Ordering::Relaxed));
            if !result.is_null() {
                let slot = self.mdm.vbucket_slot(result.index());
                self.mdm.list_clear(&slot.blobs);
                slot.stats.clear();
                for slot_trait in &slot.traits {
                    slot_trait.store(0, Ordering::Relaxed);
                }
                slot.ref_count.store(1, Ordering::Relaxed);
                slot.active.store(1, Ordering::Relaxed);
                header
                    .first_free_vbucket
                    .store(slot.next_free.load(Ordering::Relaxed), Ordering::Relaxed);
                header.num_vbuckets.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            error!(
                "exceeded max allowed vbuckets; increase max_vbuckets_per_node \
                 in the tierbuf configuration"
            );
        }

        if !result.is_null() {
            self.local_put(name, result.as_u64(), MapType::VBucket);
        }
        result
    }

    /// Open `name` if it exists (bumping its refcount) or create it from the
    /// free list. NULL when the table is full.
    pub fn local_get_or_create_vbucket_id(&self, name: &str) -> VBucketId {
        let header = self.mdm.header();
        let _guard = header.vbucket_mutex.lock();

        let existing = VBucketId::from_u64(self.local_get(name, MapType::VBucket));
        if !existing.is_null() {
            info!(name, "opening vbucket");
            self.local_increment_vbucket_refcount(existing);
            existing
        } else {
            info!(name, "creating vbucket");
            self.local_get_next_free_vbucket_id(name)
        }
    }

    /// Open or create the vbucket `name` on its shard node.
    pub fn get_or_create_vbucket_id(&self, name: &str) -> Result<VBucketId> {
        if is_vbucket_name_too_long(name) {
            return Err(CommonError::NameTooLong {
                name: name.to_string(),
                max: naming::MAX_VBUCKET_NAME_SIZE,
            }
            .into());
        }
        let target = self.hash_name(name);
        if self.is_local(target) {
            Ok(self.local_get_or_create_vbucket_id(name))
        } else {
            Ok(self
                .rpc
                .call(
                    target,
                    Request::GetOrCreateVBucketId {
                        name: name.to_string(),
                    },
                )?
                .into_vbucket_id()?)
        }
    }

    // ------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------

    /// Bump a bucket's handle count.
    pub fn local_increment_bucket_refcount(&self, id: BucketId) {
        self.mdm
            .bucket_slot(id.index())
            .ref_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a bucket handle.
    pub fn local_decrement_bucket_refcount(&self, id: BucketId) {
        let slot = self.mdm.bucket_slot(id.index());
        slot.ref_count.fetch_sub(1, Ordering::Relaxed);
        assert!(slot.ref_count.load(Ordering::Relaxed) >= 0);
    }

    /// Drop a bucket handle on the bucket's home node.
    pub fn decrement_bucket_refcount(&self, id: BucketId) -> Result<()> {
        let target = id.node_id();
        if self.is_local(target) {
            self.local_decrement_bucket_refcount(id);
            Ok(())
        } else {
            self.rpc
                .call(target, Request::DecrementRefcount { bucket_id: id })?
                .into_bool()?;
            Ok(())
        }
    }

    /// Bump a vbucket's handle count.
    pub fn local_increment_vbucket_refcount(&self, id: VBucketId) {
        self.mdm
            .vbucket_slot(id.index())
            .ref_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a vbucket handle.
    pub fn local_decrement_vbucket_refcount(&self, id: VBucketId) {
        let slot = self.mdm.vbucket_slot(id.index());
        slot.ref_count.fetch_sub(1, Ordering::Relaxed);
        assert!(slot.ref_count.load(Ordering::Relaxed) >= 0);
    }

    /// Drop a vbucket handle on the vbucket's home node.
    pub fn decrement_vbucket_refcount(&self, id: VBucketId) -> Result<()> {
        let target = id.node_id();
        if self.is_local(target) {
            self.local_decrement_vbucket_refcount(id);
            Ok(())
        } else {
            self.rpc
                .call(target, Request::DecrementRefcountVBucket { vbucket_id: id })?
                .into_bool()?;
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Membership lists
    // ------------------------------------------------------------------

    /// Append `blob_id` to the bucket's membership list.
    pub fn local_add_blob_id_to_bucket(&self, bucket_id: BucketId, blob_id: BlobId) {
        let _guard = self.mdm.header().bucket_mutex.lock();
        let slot = self.mdm.bucket_slot(bucket_id.index());
        self.mdm.list_append(&slot.blobs, blob_id.as_u64());
    }

    /// Append `blob_id` to the bucket's list on the bucket's home node.
    pub fn add_blob_id_to_bucket(&self, blob_id: BlobId, bucket_id: BucketId) -> Result<()> {
        let target = bucket_id.node_id();
        if self.is_local(target) {
            self.local_add_blob_id_to_bucket(bucket_id, blob_id);
            Ok(())
        } else {
            self.rpc
                .call(target, Request::AddBlobIdToBucket { bucket_id, blob_id })?
                .into_bool()?;
            Ok(())
        }
    }

    /// Append `blob_id` to the vbucket's membership list.
    pub fn local_add_blob_id_to_vbucket(&self, vbucket_id: VBucketId, blob_id: BlobId) {
        let _guard = self.mdm.header().vbucket_mutex.lock();
        let slot = self.mdm.vbucket_slot(vbucket_id.index());
        self.mdm.list_append(&slot.blobs, blob_id.as_u64());
    }

    /// Append `blob_id` to the vbucket's list on the vbucket's home node.
    pub fn add_blob_id_to_vbucket(&self, blob_id: BlobId, vbucket_id: VBucketId) -> Result<()> {
        let target = vbucket_id.node_id();
        if self.is_local(target) {
            self.local_add_blob_id_to_vbucket(vbucket_id, blob_id);
            Ok(())
        } else {
            self.rpc
                .call(
                    target,
                    Request::AddBlobIdToVBucket {
                        vbucket_id,
                        blob_id,
                    },
                )?
                .into_bool()?;
            Ok(())
        }
    }

    /// Drop `blob_id` from the bucket's membership list.
    pub fn local_remove_blob_from_bucket_info(&self, bucket_id: BucketId, blob_id: BlobId) {
        let _guard = self.mdm.header().bucket_mutex.lock();
        let slot = self.mdm.bucket_slot(bucket_id.index());
        self.mdm.list_remove(&slot.blobs, blob_id.as_u64());
    }

    /// Drop `blob_id` from the bucket's list on the bucket's home node.
    pub fn remove_blob_from_bucket_info(
        &self,
        bucket_id: BucketId,
        blob_id: BlobId,
    ) -> Result<()> {
        let target = bucket_id.node_id();
        if self.is_local(target) {
            self.local_remove_blob_from_bucket_info(bucket_id, blob_id);
            Ok(())
        } else {
            self.rpc
                .call(
                    target,
                    Request::RemoveBlobFromBucketInfo { bucket_id, blob_id },
                )?
                .into_bool()?;
            Ok(())
        }
    }

    /// Whether the bucket's membership list holds `blob_id`.
    #[must_use]
    pub fn local_contains_blob(&self, bucket_id: BucketId, blob_id: BlobId) -> bool {
        let _guard = self.mdm.header().bucket_mutex.lock();
        let slot = self.mdm.bucket_slot(bucket_id.index());
        self.mdm.list_contains(&slot.blobs, blob_id.as_u64())
    }

    /// Whether `blob_name` names a blob that is a member of `bucket_id`.
    pub fn contains_blob(&self, bucket_id: BucketId, blob_name: &str) -> Result<bool> {
        let blob_id = self.get_blob_id(blob_name, bucket_id)?;
        if blob_id.is_null() {
            return Ok(false);
        }
        let target = bucket_id.node_id();
        if self.is_local(target) {
            Ok(self.local_contains_blob(bucket_id, blob_id))
        } else {
            Ok(self
                .rpc
                .call(target, Request::ContainsBlob { bucket_id, blob_id })?
                .into_bool()?)
        }
    }

    /// Copy of the bucket's membership list.
    #[must_use]
    pub fn local_get_blob_ids(&self, bucket_id: BucketId) -> Vec<BlobId> {
        let _guard = self.mdm.header().bucket_mutex.lock();
        let slot = self.mdm.bucket_slot(bucket_id.index());
        self.mdm
            .list_to_vec(&slot.blobs)
            .into_iter()
            .map(BlobId::from_u64)
            .collect()
    }

    /// The blobs in `bucket_id`, in insertion order.
    pub fn get_blob_ids(&self, bucket_id: BucketId) -> Result<Vec<BlobId>> {
        let target = bucket_id.node_id();
        if self.is_local(target) {
            Ok(self.local_get_blob_ids(bucket_id))
        } else {
            Ok(self
                .rpc
                .call(target, Request::GetBlobIds { bucket_id })?
                .into_blob_ids()?)
        }
    }

    // ------------------------------------------------------------------
    // Blob metadata
    // ------------------------------------------------------------------

    /// Create blob metadata: pick the home node from the name hash, store
    /// the buffer-id list there, bind the name, and record bucket
    /// membership. Returns the new blob id.
    pub fn attach_blob_to_bucket(
        &self,
        blob_name: &str,
        bucket_id: BucketId,
        buffer_ids: &[BufferId],
        is_swap_blob: bool,
    ) -> Result<BlobId> {
        if is_blob_name_too_long(blob_name) {
            return Err(CommonError::NameTooLong {
                name: blob_name.to_string(),
                max: naming::MAX_BLOB_NAME_SIZE,
            }
            .into());
        }

        let target = self.hash_name(blob_name);
        let offset = self.allocate_buffer_id_list(target, buffer_ids)?;
        let blob_id = BlobId::from_parts(target, offset, is_swap_blob);

        self.put_blob_id(blob_name, blob_id, bucket_id)?;
        self.add_blob_id_to_bucket(blob_id, bucket_id)?;
        Ok(blob_id)
    }

    /// Store a buffer-id list on `target_node`'s pool.
    pub fn allocate_buffer_id_list(
        &self,
        target_node: u32,
        buffer_ids: &[BufferId],
    ) -> Result<u32> {
        if self.is_local(target_node) {
            Ok(self.pool.allocate_buffer_id_list(buffer_ids))
        } else {
            Ok(self
                .rpc
                .call(
                    target_node,
                    Request::AllocateBufferIdList {
                        buffer_ids: buffer_ids.to_vec(),
                    },
                )?
                .into_u32()?)
        }
    }

    /// The buffer-id list backing `blob_id`, from the blob's home node.
    pub fn get_buffer_id_list(&self, blob_id: BlobId) -> Result<Vec<BufferId>> {
        let target = blob_id.home_node();
        if self.is_local(target) {
            Ok(self.pool.buffer_id_list(blob_id.buffer_ids_offset()))
        } else {
            Ok(self
                .rpc
                .call(target, Request::GetBufferIdList { blob_id })?
                .into_buffer_ids()?)
        }
    }

    /// Free `blob_id`'s buffer-id list on its home node.
    pub fn free_buffer_id_list(&self, blob_id: BlobId) -> Result<()> {
        let target = blob_id.home_node();
        if self.is_local(target) {
            self.pool.free_buffer_id_list(blob_id.buffer_ids_offset());
            Ok(())
        } else {
            self.rpc
                .call(target, Request::FreeBufferIdList { blob_id })?
                .into_bool()?;
            Ok(())
        }
    }

    /// Total payload bytes of `blob_id`, summed over its buffers.
    pub fn blob_size(&self, blob_id: BlobId) -> Result<u64> {
        let buffer_ids = self.get_buffer_id_list(blob_id)?;
        Ok(buffer_ids
            .iter()
            .map(|&id| self.pool.buffer_size(id))
            .sum())
    }

    fn local_release_blob_payload(&self, blob_id: BlobId) {
        if blob_id.is_in_swap() {
            // TODO: invalidate the swap region entry once a swap manager
            // exists.
        } else {
            let buffer_ids = self.pool.buffer_id_list(blob_id.buffer_ids_offset());
            self.pool.release_buffers(&buffer_ids);
        }
        self.pool.free_buffer_id_list(blob_id.buffer_ids_offset());
    }

    /// Tear down a blob's buffers and name binding, given its name. Runs on
    /// the blob's home node; the bucket membership entry is the caller's
    /// problem.
    pub fn local_destroy_blob_by_name(
        &self,
        blob_name: &str,
        blob_id: BlobId,
        bucket_id: BucketId,
    ) -> Result<()> {
        self.local_release_blob_payload(blob_id);
        self.delete_blob_id(blob_name, bucket_id)
    }

    /// Tear down a blob's buffers and name binding, recovering the name from
    /// the reverse map. Proceeds without the name deletion if the reverse
    /// mapping is gone.
    pub fn local_destroy_blob_by_id(&self, blob_id: BlobId, bucket_id: BucketId) -> Result<()> {
        self.local_release_blob_payload(blob_id);

        let blob_name = self.local_get_blob_name_from_id(blob_id);
        if blob_name.is_empty() {
            debug!(
                blob = blob_id.as_u64(),
                "expected to find blob id in the blob map but didn't"
            );
            Ok(())
        } else {
            self.delete_blob_id(&blob_name, bucket_id)
        }
    }

    fn destroy_blob_payload(&self, blob_id: BlobId, bucket_id: BucketId) -> Result<()> {
        let target = blob_id.home_node();
        if self.is_local(target) {
            self.local_destroy_blob_by_id(blob_id, bucket_id)
        } else {
            self.rpc
                .call(target, Request::DestroyBlobById { blob_id, bucket_id })?
                .into_bool()?;
            Ok(())
        }
    }

    /// Destroy the blob named `blob_name` in `bucket_id`: release its
    /// buffers, free its buffer-id list, delete its name binding, and drop
    /// it from the bucket's membership list. A no-op for unknown names.
    pub fn destroy_blob_by_name(&self, bucket_id: BucketId, blob_name: &str) -> Result<()> {
        let blob_id = self.get_blob_id(blob_name, bucket_id)?;
        if blob_id.is_null() {
            return Ok(());
        }

        let target = blob_id.home_node();
        if self.is_local(target) {
            self.local_destroy_blob_by_name(blob_name, blob_id, bucket_id)?;
        } else {
            self.rpc
                .call(
                    target,
                    Request::DestroyBlobByName {
                        blob_name: blob_name.to_string(),
                        blob_id,
                        bucket_id,
                    },
                )?
                .into_bool()?;
        }
        self.remove_blob_from_bucket_info(bucket_id, blob_id)
    }

    /// Destroy a blob starting from its id: the same teardown as
    /// [`Self::destroy_blob_by_name`], with the name recovered from the
    /// reverse map on the blob's home node.
    pub fn destroy_blob_by_id(&self, blob_id: BlobId, bucket_id: BucketId) -> Result<()> {
        self.destroy_blob_payload(blob_id, bucket_id)?;
        self.remove_blob_from_bucket_info(bucket_id, blob_id)
    }

    /// Rebind a blob from `old_name` to `new_name`. Delete-then-put; a
    /// concurrent lookup between the steps can miss the binding.
    pub fn rename_blob(
        &self,
        old_name: &str,
        new_name: &str,
        bucket_id: BucketId,
    ) -> Result<()> {
        if is_blob_name_too_long(new_name) {
            return Err(CommonError::NameTooLong {
                name: new_name.to_string(),
                max: naming::MAX_BLOB_NAME_SIZE,
            }
            .into());
        }
        let blob_id = self.get_blob_id(old_name, bucket_id)?;
        if blob_id.is_null() {
            debug!(old_name, "rename of unknown blob");
            return Ok(());
        }
        self.delete_blob_id(old_name, bucket_id)?;
        self.put_blob_id(new_name, blob_id, bucket_id)
    }

    /// Recover a blob's user-visible name from the reverse map; empty if the
    /// id is unknown here.
    #[must_use]
    pub fn local_get_blob_name_from_id(&self, blob_id: BlobId) -> String {
        let internal = self.store.reverse_get(blob_id.as_u64(), MapType::Blob);
        if internal.len() > BUCKET_ID_HEX_LEN {
            internal[BUCKET_ID_HEX_LEN..].to_string()
        } else {
            String::new()
        }
    }

    /// Recover a blob's user-visible name from its home node.
    pub fn get_blob_name_from_id(&self, blob_id: BlobId) -> Result<String> {
        let target = blob_id.home_node();
        if self.is_local(target) {
            Ok(self.local_get_blob_name_from_id(blob_id))
        } else {
            Ok(self
                .rpc
                .call(target, Request::GetBlobNameFromId { blob_id })?
                .into_name()?)
        }
    }

    /// Recover a blob's owning bucket from the hex prefix of its internal
    /// name; NULL if the id is unknown here.
    #[must_use]
    pub fn local_get_bucket_id_from_blob_id(&self, blob_id: BlobId) -> BucketId {
        let internal = self.store.reverse_get(blob_id.as_u64(), MapType::Blob);
        if internal.len() > BUCKET_ID_HEX_LEN {
            BucketId::from_u64(tierbuf_common::hex_string_to_u64(&internal))
        } else {
            BucketId::NULL
        }
    }

    /// Recover a blob's owning bucket from its home node.
    pub fn get_bucket_id_from_blob_id(&self, blob_id: BlobId) -> Result<BucketId> {
        let target = blob_id.home_node();
        if self.is_local(target) {
            Ok(self.local_get_bucket_id_from_blob_id(blob_id))
        } else {
            Ok(self
                .rpc
                .call(target, Request::GetBucketIdFromBlobId { blob_id })?
                .into_bucket_id()?)
        }
    }

    // ------------------------------------------------------------------
    // Bucket destroy and rename
    // ------------------------------------------------------------------

    /// Destroy `bucket_id` if this is the last handle: destroy its blobs,
    /// return the slot to the free list, delete the name binding. Returns
    /// `false` (leaving everything intact) while other handles are open.
    pub fn local_destroy_bucket(&self, name: &str, bucket_id: BucketId) -> Result<bool> {
        let header = self.mdm.header();

        let blob_ids = {
            let _guard = header.bucket_mutex.lock();
            let slot = self.mdm.bucket_slot(bucket_id.index());

            if slot.active.load(Ordering::Relaxed) == 0 {
                warn!(name, "destroy of an inactive bucket");
                return Ok(false);
            }
            let ref_count = slot.ref_count.load(Ordering::Relaxed);
            if ref_count != 1 {
                warn!(
                    name,
                    ref_count, "cannot destroy bucket while other handles are open"
                );
                return Ok(false);
            }

            let blob_ids: Vec<BlobId> = self
                .mdm
                .list_to_vec(&slot.blobs)
                .into_iter()
                .map(BlobId::from_u64)
                .collect();
            self.mdm.list_clear(&slot.blobs);
            slot.active.store(0, Ordering::Relaxed);
            slot.ref_count.store(0, Ordering::Relaxed);
            slot.next_free
                .store(header.first_free_bucket.load(Ordering::Relaxed), Ordering::Relaxed);
            header
                .first_free_bucket
                .store(bucket_id.as_u64(), Ordering::Relaxed);
            header.num_buckets.fetch_sub(1, Ordering::Relaxed);

            self.delete_bucket_id(name)?;
            blob_ids
        };

        // Blob teardown re-enters the bucket table through remote handlers,
        // so it must run after the mutex is released; the membership list is
        // already detached.
        for blob_id in blob_ids {
            self.destroy_blob_payload(blob_id, bucket_id)?;
        }
        Ok(true)
    }

    /// Destroy the bucket on its home node. `true` if it was torn down.
    pub fn destroy_bucket(&self, name: &str, bucket_id: BucketId) -> Result<bool> {
        let target = bucket_id.node_id();
        if self.is_local(target) {
            self.local_destroy_bucket(name, bucket_id)
        } else {
            Ok(self
                .rpc
                .call(
                    target,
                    Request::DestroyBucket {
                        name: name.to_string(),
                        bucket_id,
                    },
                )?
                .into_bool()?)
        }
    }

    /// Rebind a bucket from `old_name` to `new_name`. Delete-then-put.
    pub fn local_rename_bucket(
        &self,
        bucket_id: BucketId,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.delete_bucket_id(old_name)?;
        self.put_bucket_id(new_name, bucket_id)
    }

    /// Rename the bucket on its home node.
    pub fn rename_bucket(
        &self,
        bucket_id: BucketId,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        if is_bucket_name_too_long(new_name) {
            return Err(CommonError::NameTooLong {
                name: new_name.to_string(),
                max: naming::MAX_BUCKET_NAME_SIZE,
            }
            .into());
        }
        let target = bucket_id.node_id();
        if self.is_local(target) {
            self.local_rename_bucket(bucket_id, old_name, new_name)
        } else {
            self.rpc
                .call(
                    target,
                    Request::RenameBucket {
                        bucket_id,
                        old_name: old_name.to_string(),
                        new_name: new_name.to_string(),
                    },
                )?
                .into_bool()?;
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // System view state
    // ------------------------------------------------------------------

    /// Record a capacity delta for `device` on this node: the local view
    /// moves immediately, the global view on the next flush.
    pub fn adjust_capacity(&self, device: tierbuf_common::DeviceId, delta: i64) {
        if let Some(cell) = self.mdm.local_system_view().get(device as usize) {
            cell.fetch_add(delta, Ordering::Relaxed);
        }
        self.pool.adjust_capacity(device, delta);
    }

    /// Apply flushed deltas to the authoritative global view. Runs on the
    /// global view node only.
    pub fn local_update_global_system_view_state(&self, adjustments: &[i64]) {
        let Some(cells) = self.mdm.global_system_view() else {
            error!("global system view update on a node that does not hold it");
            return;
        };
        for (device, &delta) in adjustments.iter().enumerate() {
            if delta != 0 {
                if let Some(cell) = cells.get(device) {
                    cell.fetch_add(delta, Ordering::Relaxed);
                    debug!(device, delta, "adjusted global device availability");
                }
            }
        }
    }

    /// Drain this node's pending capacity deltas and ship them to the
    /// global view node. No traffic when nothing changed.
    pub fn update_global_system_view_state(&self) -> Result<()> {
        let adjustments = self.pool.take_capacity_adjustments();
        if adjustments.iter().all(|&delta| delta == 0) {
            return Ok(());
        }
        let target = self.mdm.global_view_node_id();
        if self.is_local(target) {
            self.local_update_global_system_view_state(&adjustments);
            Ok(())
        } else {
            self.rpc
                .call(target, Request::UpdateGlobalSystemViewState { adjustments })?
                .into_bool()?;
            Ok(())
        }
    }

    /// Snapshot of the authoritative per-device availability.
    #[must_use]
    pub fn local_get_global_device_capacities(&self) -> Vec<u64> {
        self.mdm
            .global_system_view()
            .map(|cells| {
                cells
                    .iter()
                    .map(|cell| cell.load(Ordering::Relaxed).max(0) as u64)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the global per-device availability, from the global view
    /// node. Cells are read independently; cross-device tearing is fine.
    pub fn get_global_device_capacities(&self) -> Result<Vec<u64>> {
        let target = self.mdm.global_view_node_id();
        if self.is_local(target) {
            Ok(self.local_get_global_device_capacities())
        } else {
            Ok(self
                .rpc
                .call(target, Request::GetGlobalDeviceCapacities)?
                .into_capacities()?)
        }
    }

    /// Swap file path for `node_id`.
    #[must_use]
    pub fn swap_filename(&self, node_id: u32) -> String {
        self.mdm.swap_filename(node_id)
    }
}

impl RpcHandler for MetadataService {
    fn handle(&self, request: Request) -> Response {
        match request {
            Request::Get { key, map } => Response::U64(self.local_get(&key, map)),
            Request::Put { key, id, map } => {
                self.local_put(&key, id, map);
                Response::Bool(true)
            }
            Request::Delete { key, map } => {
                self.local_delete(&key, map);
                Response::Bool(true)
            }
            Request::GetBlobNameFromId { blob_id } => {
                Response::Name(self.local_get_blob_name_from_id(blob_id))
            }
            Request::GetBucketIdFromBlobId { blob_id } => {
                Response::BucketId(self.local_get_bucket_id_from_blob_id(blob_id))
            }
            Request::GetBlobIds { bucket_id } => {
                Response::BlobIds(self.local_get_blob_ids(bucket_id))
            }
            Request::GetOrCreateBucketId { name } => {
                Response::BucketId(self.local_get_or_create_bucket_id(&name))
            }
            Request::GetOrCreateVBucketId { name } => {
                Response::VBucketId(self.local_get_or_create_vbucket_id(&name))
            }
            Request::AddBlobIdToBucket { bucket_id, blob_id } => {
                self.local_add_blob_id_to_bucket(bucket_id, blob_id);
                Response::Bool(true)
            }
            Request::AddBlobIdToVBucket {
                vbucket_id,
                blob_id,
            } => {
                self.local_add_blob_id_to_vbucket(vbucket_id, blob_id);
                Response::Bool(true)
            }
            Request::AllocateBufferIdList { buffer_ids } => {
                Response::U32(self.pool.allocate_buffer_id_list(&buffer_ids))
            }
            Request::GetBufferIdList { blob_id } => {
                Response::BufferIds(self.pool.buffer_id_list(blob_id.buffer_ids_offset()))
            }
            Request::FreeBufferIdList { blob_id } => {
                self.pool.free_buffer_id_list(blob_id.buffer_ids_offset());
                Response::Bool(true)
            }
            Request::DestroyBlobByName {
                blob_name,
                blob_id,
                bucket_id,
            } => Response::Bool(report_ok(
                self.local_destroy_blob_by_name(&blob_name, blob_id, bucket_id),
                "destroy blob by name",
            )),
            Request::DestroyBlobById { blob_id, bucket_id } => Response::Bool(report_ok(
                self.local_destroy_blob_by_id(blob_id, bucket_id),
                "destroy blob by id",
            )),
            Request::RemoveBlobFromBucketInfo { bucket_id, blob_id } => {
                self.local_remove_blob_from_bucket_info(bucket_id, blob_id);
                Response::Bool(true)
            }
            Request::ContainsBlob { bucket_id, blob_id } => {
                Response::Bool(self.local_contains_blob(bucket_id, blob_id))
            }
            Request::DestroyBucket { name, bucket_id } => Response::Bool(report_bool(
                self.local_destroy_bucket(&name, bucket_id),
                "destroy bucket",
            )),
            Request::RenameBucket {
                bucket_id,
                old_name,
                new_name,
            } => Response::Bool(report_ok(
                self.local_rename_bucket(bucket_id, &old_name, &new_name),
                "rename bucket",
            )),
            Request::DecrementRefcount { bucket_id } => {
                self.local_decrement_bucket_refcount(bucket_id);
                Response::Bool(true)
            }
            Request::DecrementRefcountVBucket { vbucket_id } => {
                self.local_decrement_vbucket_refcount(vbucket_id);
                Response::Bool(true)
            }
            Request::GetRemainingTargetCapacity { target_id } => {
                Response::U64(self.local_get_remaining_target_capacity(target_id))
            }
            Request::GetGlobalDeviceCapacities => {
                Response::Capacities(self.local_get_global_device_capacities())
            }
            Request::UpdateGlobalSystemViewState { adjustments } => {
                self.local_update_global_system_view_state(&adjustments);
                Response::Bool(true)
            }
            Request::GetNodeTargets => Response::TargetIds(self.local_get_node_targets()),
        }
    }
}

/// Log and flatten a nested-dispatch failure inside a remote handler; the
/// caller sees the boolean outcome, the error stays in this node's log.
fn report_ok(result: Result<()>, op: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            error!(%err, op, "remote handler failed");
            false
        }
    }
}

fn report_bool(result: Result<bool>, op: &str) -> bool {
    match result {
        Ok(value) => value,
        Err(err) => {
            error!(%err, op, "remote handler failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::MemoryBufferPool;
    use crate::storage::MemoryNameStore;
    use std::collections::HashSet;
    use tierbuf_common::Config;
    use tierbuf_rpc::{InProcessRouter, InProcessRpc};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.metadata.shared_memory_bytes = 8 * 1024 * 1024;
        config.metadata.max_buckets_per_node = 16;
        config.metadata.max_vbuckets_per_node = 4;
        config.devices.num_devices = 2;
        config.devices.capacities = vec![100, 200];
        config
    }

    fn single_node_with(config: &Config) -> (Arc<MetadataService>, Arc<MemoryBufferPool>) {
        let mdm = MetadataManager::create_in_memory(config).unwrap();
        let pool = Arc::new(MemoryBufferPool::new(1, &config.devices));
        let store = Arc::new(MemoryNameStore::default());
        let rpc = Arc::new(InProcessRpc::new(1, 1, Arc::new(InProcessRouter::new())));
        let service = Arc::new(MetadataService::new(mdm, store, pool.clone(), rpc));
        (service, pool)
    }

    fn single_node() -> (Arc<MetadataService>, Arc<MemoryBufferPool>) {
        single_node_with(&test_config())
    }

    fn buffers(ids: &[u32]) -> Vec<BufferId> {
        ids.iter().map(|&i| BufferId::new(1, i)).collect()
    }

    fn assert_bucket_table_invariants(mdm: &MetadataManager) {
        let max = mdm.max_buckets();
        let free: HashSet<u32> = mdm.bucket_free_list().iter().map(|id| id.index()).collect();

        let mut active_count = 0;
        for index in 0..max {
            let is_active = mdm.bucket_slot(index).active.load(Ordering::Relaxed) != 0;
            if is_active {
                active_count += 1;
                assert!(!free.contains(&index), "active slot {index} on free list");
            } else {
                assert!(free.contains(&index), "inactive slot {index} not reachable");
            }
        }
        assert_eq!(active_count, mdm.num_buckets());
        assert_eq!(free.len() as u32 + active_count, max);
    }

    #[test]
    fn test_attach_blob_and_query() {
        let (service, _pool) = single_node();

        let bucket = service.get_or_create_bucket_id("A").unwrap();
        assert!(!bucket.is_null());
        assert_eq!(service.get_bucket_id("A").unwrap(), bucket);

        let blob = service
            .attach_blob_to_bucket("x", bucket, &buffers(&[1, 2]), false)
            .unwrap();

        assert_eq!(service.get_blob_ids(bucket).unwrap(), vec![blob]);
        assert!(service.contains_blob(bucket, "x").unwrap());
        assert_eq!(service.get_blob_name_from_id(blob).unwrap(), "x");
        assert_eq!(service.get_bucket_id_from_blob_id(blob).unwrap(), bucket);
        assert!(!blob.is_in_swap());
        assert_eq!(service.get_buffer_id_list(blob).unwrap(), buffers(&[1, 2]));
    }

    #[test]
    fn test_destroy_blob_by_name_releases_everything_once() {
        let (service, pool) = single_node();

        let bucket = service.get_or_create_bucket_id("A").unwrap();
        let blob = service
            .attach_blob_to_bucket("x", bucket, &buffers(&[1, 2]), false)
            .unwrap();
        let offset = blob.buffer_ids_offset();

        service.destroy_blob_by_name(bucket, "x").unwrap();

        assert!(!service.contains_blob(bucket, "x").unwrap());
        assert!(service.get_blob_id("x", bucket).unwrap().is_null());
        assert!(service.get_blob_ids(bucket).unwrap().is_empty());
        for id in buffers(&[1, 2]) {
            assert_eq!(pool.release_count(id), 1);
        }
        assert_eq!(pool.freed_list_count(offset), 1);

        // Destroying an unknown name is a no-op.
        service.destroy_blob_by_name(bucket, "x").unwrap();
        assert_eq!(pool.freed_list_count(offset), 1);
    }

    #[test]
    fn test_destroy_blob_by_id() {
        let (service, pool) = single_node();
        let bucket = service.get_or_create_bucket_id("A").unwrap();
        let blob = service
            .attach_blob_to_bucket("x", bucket, &buffers(&[3]), false)
            .unwrap();

        service.destroy_blob_by_id(blob, bucket).unwrap();
        assert!(service.get_blob_id("x", bucket).unwrap().is_null());
        assert!(service.get_blob_ids(bucket).unwrap().is_empty());
        assert_eq!(pool.release_count(BufferId::new(1, 3)), 1);
    }

    #[test]
    fn test_swap_blob_skips_buffer_release() {
        let (service, pool) = single_node();

        let bucket = service.get_or_create_bucket_id("B").unwrap();
        let blob = service
            .attach_blob_to_bucket("y", bucket, &buffers(&[7]), true)
            .unwrap();
        let offset = blob.buffer_ids_offset();

        assert!(blob.signed_node() < 0);
        assert!(blob.is_in_swap());
        assert_eq!(blob.home_node(), 1);

        service.destroy_blob_by_name(bucket, "y").unwrap();
        assert_eq!(pool.release_count(BufferId::new(1, 7)), 0);
        assert_eq!(pool.freed_list_count(offset), 1);
        assert!(service.get_blob_id("y", bucket).unwrap().is_null());
    }

    #[test]
    fn test_get_or_create_twice_bumps_refcount_once() {
        let (service, _pool) = single_node();

        let first = service.get_or_create_bucket_id("A").unwrap();
        let slot = service.manager().bucket_slot(first.index());
        assert_eq!(slot.ref_count.load(Ordering::Relaxed), 1);

        let second = service.get_or_create_bucket_id("A").unwrap();
        assert_eq!(second, first);
        assert_eq!(slot.ref_count.load(Ordering::Relaxed), 2);

        service.decrement_bucket_refcount(first).unwrap();
        assert_eq!(slot.ref_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_allocator_invariants_across_mixed_operations() {
        let (service, _pool) = single_node();
        let mdm = service.manager();
        assert_bucket_table_invariants(mdm);

        let a = service.get_or_create_bucket_id("a").unwrap();
        let _b = service.get_or_create_bucket_id("b").unwrap();
        let c = service.get_or_create_bucket_id("c").unwrap();
        assert_bucket_table_invariants(mdm);
        assert_eq!(mdm.num_buckets(), 3);

        assert!(service.destroy_bucket("a", a).unwrap());
        assert_bucket_table_invariants(mdm);

        let d = service.get_or_create_bucket_id("d").unwrap();
        // The freshly freed slot is the head of the free list.
        assert_eq!(d.index(), a.index());
        assert_bucket_table_invariants(mdm);

        assert!(service.destroy_bucket("c", c).unwrap());
        assert!(service.destroy_bucket("d", d).unwrap());
        assert_bucket_table_invariants(mdm);
        assert_eq!(mdm.num_buckets(), 1);
    }

    #[test]
    fn test_full_table_rejects_and_leaves_state_unchanged() {
        let mut config = test_config();
        config.metadata.max_buckets_per_node = 2;
        let (service, _pool) = single_node_with(&config);
        let mdm = service.manager();

        assert!(!service.get_or_create_bucket_id("a").unwrap().is_null());
        assert!(!service.get_or_create_bucket_id("b").unwrap().is_null());

        let overflow = service.get_or_create_bucket_id("c").unwrap();
        assert!(overflow.is_null());
        assert_eq!(mdm.num_buckets(), 2);
        assert!(mdm.bucket_free_list().is_empty());
        assert!(service.get_bucket_id("c").unwrap().is_null());
        assert_bucket_table_invariants(mdm);
    }

    #[test]
    fn test_reverse_lookup_of_unknown_id_is_empty() {
        let (service, _pool) = single_node();
        let ghost = BlobId::from_parts(1, 999, false);
        assert_eq!(service.get_blob_name_from_id(ghost).unwrap(), "");
        assert!(service.get_bucket_id_from_blob_id(ghost).unwrap().is_null());
    }

    #[test]
    fn test_rename_blob_keeps_id() {
        let (service, _pool) = single_node();
        let bucket = service.get_or_create_bucket_id("A").unwrap();
        let blob = service
            .attach_blob_to_bucket("old", bucket, &buffers(&[1]), false)
            .unwrap();

        service.rename_blob("old", "new", bucket).unwrap();
        assert!(service.get_blob_id("old", bucket).unwrap().is_null());
        assert_eq!(service.get_blob_id("new", bucket).unwrap(), blob);
    }

    #[test]
    fn test_rename_bucket_moves_the_binding() {
        let (service, _pool) = single_node();
        let bucket = service.get_or_create_bucket_id("before").unwrap();

        service.rename_bucket(bucket, "before", "after").unwrap();
        assert!(service.get_bucket_id("before").unwrap().is_null());
        assert_eq!(service.get_bucket_id("after").unwrap(), bucket);
    }

    #[test]
    fn test_destroy_bucket_requires_last_handle() {
        let (service, pool) = single_node();
        let bucket = service.get_or_create_bucket_id("A").unwrap();
        service.get_or_create_bucket_id("A").unwrap();

        // Two handles open: refuse and change nothing.
        assert!(!service.destroy_bucket("A", bucket).unwrap());
        assert_eq!(service.get_bucket_id("A").unwrap(), bucket);

        service.decrement_bucket_refcount(bucket).unwrap();
        let blob = service
            .attach_blob_to_bucket("x", bucket, &buffers(&[4]), false)
            .unwrap();
        let offset = blob.buffer_ids_offset();

        assert!(service.destroy_bucket("A", bucket).unwrap());
        assert!(service.get_bucket_id("A").unwrap().is_null());
        assert!(service.get_blob_id("x", bucket).unwrap().is_null());
        assert_eq!(pool.release_count(BufferId::new(1, 4)), 1);
        assert_eq!(pool.freed_list_count(offset), 1);
        assert_eq!(service.manager().num_buckets(), 0);
    }

    #[test]
    fn test_name_length_boundary() {
        let (service, _pool) = single_node();

        let ok = "n".repeat(naming::MAX_BUCKET_NAME_SIZE - 2);
        assert!(!service.get_or_create_bucket_id(&ok).unwrap().is_null());

        let too_long = "n".repeat(naming::MAX_BUCKET_NAME_SIZE - 1);
        assert!(service.get_or_create_bucket_id(&too_long).is_err());
    }

    #[test]
    fn test_vbucket_lifecycle_and_traits() {
        let (service, _pool) = single_node();

        let vbucket = service.get_or_create_vbucket_id("vb").unwrap();
        assert!(!vbucket.is_null());
        assert_eq!(service.get_or_create_vbucket_id("vb").unwrap(), vbucket);

        let slot = service.manager().vbucket_slot(vbucket.index());
        assert_eq!(slot.ref_count.load(Ordering::Relaxed), 2);
        assert!(slot
            .traits
            .iter()
            .all(|t| t.load(Ordering::Relaxed) == 0));

        let bucket = service.get_or_create_bucket_id("A").unwrap();
        let blob = service
            .attach_blob_to_bucket("x", bucket, &buffers(&[1]), false)
            .unwrap();
        service.add_blob_id_to_vbucket(blob, vbucket).unwrap();
        assert_eq!(
            service.manager().list_to_vec(&slot.blobs),
            vec![blob.as_u64()]
        );

        service.decrement_vbucket_refcount(vbucket).unwrap();
        assert_eq!(slot.ref_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_blob_size_sums_buffers() {
        let (service, _pool) = single_node();
        let bucket = service.get_or_create_bucket_id("A").unwrap();
        let blob = service
            .attach_blob_to_bucket("x", bucket, &buffers(&[1, 2, 3]), false)
            .unwrap();
        assert_eq!(
            service.blob_size(blob).unwrap(),
            3 * MemoryBufferPool::DEFAULT_BUFFER_BYTES
        );
    }

    #[test]
    fn test_internal_name_law_through_the_service() {
        let (service, _pool) = single_node();
        let bucket = service.get_or_create_bucket_id("A").unwrap();
        let internal = make_internal_blob_name("x", bucket);
        assert_eq!(
            tierbuf_common::hex_string_to_u64(&internal),
            bucket.as_u64()
        );
    }

    #[test]
    fn test_swap_filename_through_the_service() {
        let (service, _pool) = single_node();
        assert_eq!(service.swap_filename(2), "tierbuf_swap_2.dat");
    }
}
