//! Tierbuf Common - Shared types and utilities
//!
//! This crate provides the packed identifier types, blob name encoding,
//! configuration structures, and error definitions used across all
//! tierbuf components.

pub mod config;
pub mod error;
pub mod ids;
pub mod naming;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::*;
pub use naming::{
    hex_string_to_u64, hex_string_to_u64_strict, is_blob_name_too_long, is_bucket_name_too_long,
    is_vbucket_name_too_long, make_internal_blob_name, MapType, BUCKET_ID_HEX_LEN,
};
