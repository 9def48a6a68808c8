//! Name-map storage facade.
//!
//! Three logical maps (bucket, vbucket, blob) take a string key to a 64-bit
//! id, with a reverse lookup from id back to key. Which node stores a given
//! key is decided by a cluster-seeded string hash; the maps themselves are
//! behind this trait so the backend can be swapped without touching the
//! manager. Internal synchronization is the backend's responsibility.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hasher;
use tierbuf_common::MapType;
use twox_hash::XxHash64;

/// Seed for the cluster-wide string hash; identical on every node so that
/// every node computes the same shard for a name.
pub const MAP_SEED: u32 = 0x4E58_E5DF;

/// Storage backend for the three name maps.
pub trait NameStore: Send + Sync {
    /// Cluster-seeded hash of `name`.
    fn hash_name(&self, name: &str) -> u64;

    /// Insert or replace `key -> id`.
    fn put(&self, key: &str, id: u64, map: MapType);

    /// Look up `key`; 0 if absent.
    fn get(&self, key: &str, map: MapType) -> u64;

    /// Remove `key` if present.
    fn delete(&self, key: &str, map: MapType);

    /// Look up the key bound to `id`; empty string if absent.
    fn reverse_get(&self, id: u64, map: MapType) -> String;
}

#[derive(Default)]
struct MapPair {
    forward: HashMap<String, u64>,
    reverse: HashMap<u64, String>,
}

/// Process-lifetime name store: a forward/reverse map pair per map type.
pub struct MemoryNameStore {
    seed: u64,
    bucket: RwLock<MapPair>,
    vbucket: RwLock<MapPair>,
    blob: RwLock<MapPair>,
}

impl MemoryNameStore {
    /// Create a store hashing with `seed`.
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self {
            seed: u64::from(seed),
            bucket: RwLock::new(MapPair::default()),
            vbucket: RwLock::new(MapPair::default()),
            blob: RwLock::new(MapPair::default()),
        }
    }

    fn pair(&self, map: MapType) -> &RwLock<MapPair> {
        match map {
            MapType::Bucket => &self.bucket,
            MapType::VBucket => &self.vbucket,
            MapType::Blob => &self.blob,
        }
    }
}

impl Default for MemoryNameStore {
    fn default() -> Self {
        Self::new(MAP_SEED)
    }
}

impl NameStore for MemoryNameStore {
    fn hash_name(&self, name: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(name.as_bytes());
        hasher.finish()
    }

    fn put(&self, key: &str, id: u64, map: MapType) {
        let mut pair = self.pair(map).write();
        if let Some(old) = pair.forward.insert(key.to_string(), id) {
            pair.reverse.remove(&old);
        }
        pair.reverse.insert(id, key.to_string());
    }

    fn get(&self, key: &str, map: MapType) -> u64 {
        self.pair(map).read().forward.get(key).copied().unwrap_or(0)
    }

    fn delete(&self, key: &str, map: MapType) {
        let mut pair = self.pair(map).write();
        if let Some(id) = pair.forward.remove(key) {
            pair.reverse.remove(&id);
        }
    }

    fn reverse_get(&self, id: u64, map: MapType) -> String {
        self.pair(map)
            .read()
            .reverse
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete_law() {
        let store = MemoryNameStore::default();

        store.put("alpha", 11, MapType::Bucket);
        assert_eq!(store.get("alpha", MapType::Bucket), 11);
        store.delete("alpha", MapType::Bucket);
        assert_eq!(store.get("alpha", MapType::Bucket), 0);
    }

    #[test]
    fn test_maps_are_independent() {
        let store = MemoryNameStore::default();
        store.put("same", 1, MapType::Bucket);
        store.put("same", 2, MapType::Blob);
        assert_eq!(store.get("same", MapType::Bucket), 1);
        assert_eq!(store.get("same", MapType::Blob), 2);
        assert_eq!(store.get("same", MapType::VBucket), 0);
    }

    #[test]
    fn test_reverse_get_tracks_bindings() {
        let store = MemoryNameStore::default();
        store.put("blob-key", 42, MapType::Blob);
        assert_eq!(store.reverse_get(42, MapType::Blob), "blob-key");
        assert_eq!(store.reverse_get(43, MapType::Blob), "");

        store.delete("blob-key", MapType::Blob);
        assert_eq!(store.reverse_get(42, MapType::Blob), "");
    }

    #[test]
    fn test_rebinding_an_id_drops_the_old_reverse_entry() {
        let store = MemoryNameStore::default();
        store.put("old", 7, MapType::Bucket);
        store.put("old", 8, MapType::Bucket);
        assert_eq!(store.reverse_get(7, MapType::Bucket), "");
        assert_eq!(store.reverse_get(8, MapType::Bucket), "old");
    }

    #[test]
    fn test_hash_is_seeded_and_stable() {
        let a = MemoryNameStore::new(MAP_SEED);
        let b = MemoryNameStore::new(MAP_SEED);
        let c = MemoryNameStore::new(1);
        assert_eq!(a.hash_name("bucket"), b.hash_name("bucket"));
        assert_ne!(a.hash_name("bucket"), c.hash_name("bucket"));
    }
}
