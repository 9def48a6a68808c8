//! Metadata manager error types.
//!
//! Expected outcomes keep flowing as sentinel values (NULL ids, empty
//! strings, `false`); an `Err` here means a rejected argument, a transport
//! failure, or a region problem.

use thiserror::Error;
use tierbuf_rpc::RpcError;
use tierbuf_shm::ShmError;

/// Result type for metadata operations.
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Errors surfaced by the metadata manager.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Common(#[from] tierbuf_common::Error),

    #[error(transparent)]
    Shm(#[from] ShmError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("region does not contain a metadata manager (bad magic or version)")]
    InvalidRegion,
}
