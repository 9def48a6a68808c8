//! Tierbuf metadata manager.
//!
//! The distributed metadata plane of the tierbuf buffering layer: one
//! manager per node, each owning a position-independent shared memory region
//! with the bucket and vbucket slot tables, the per-node system view state,
//! and the id heap backing membership lists. Name-to-id bindings shard
//! across nodes by a seeded string hash; every operation routes to the node
//! owning its key or id and runs there, locally or over RPC.

pub mod error;
pub mod layout;
pub mod manager;
pub mod pool;
pub mod service;
pub mod storage;
pub mod swap;
pub mod targets;

pub use error::{MetadataError, Result};
pub use manager::MetadataManager;
pub use pool::{BufferPool, MemoryBufferPool};
pub use service::MetadataService;
pub use storage::{MemoryNameStore, NameStore, MAP_SEED};
pub use swap::SwapBlob;
pub use targets::find_target_id_from_device_id;
