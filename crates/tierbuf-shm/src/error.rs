//! Shared memory error types.

use thiserror::Error;

/// Result type for shared memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors from segment management and arena layout.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("invalid segment name: {0}")]
    InvalidName(String),

    #[error("segment not found: {0}")]
    NotFound(String),

    #[error("failed to create segment: {0}")]
    SegmentCreate(#[source] std::io::Error),

    #[error("failed to open segment: {0}")]
    SegmentOpen(#[source] std::io::Error),

    #[error("mmap failed: {0}")]
    Mmap(#[source] std::io::Error),

    #[error("metadata arena exhausted: needed {needed} bytes, {available} available")]
    ArenaExhausted { needed: usize, available: usize },

    #[error("region too small: {size} bytes for a minimum of {min} bytes")]
    RegionTooSmall { size: usize, min: usize },
}
