//! Blob name encoding and name-size limits.
//!
//! A blob is keyed in the blob map by its *internal* name: the 16-character
//! lowercase hex rendering of the owning bucket's id (most-significant byte
//! first) followed by the user-visible name. The raw id bytes cannot be used
//! directly because map keys are treated as strings and a zero byte would
//! truncate them; two hex characters stand in for each byte instead. The
//! fixed prefix both namespaces blob names by bucket and lets the owning
//! bucket be recovered from any reverse-mapped internal name.

use crate::ids::BucketId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Selects one of the three name-to-id maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapType {
    Bucket,
    VBucket,
    Blob,
}

/// Length of the hex-encoded bucket id prefix of an internal blob name.
pub const BUCKET_ID_HEX_LEN: usize = std::mem::size_of::<BucketId>() * 2;

/// Maximum blob name length, including the terminator slot.
pub const MAX_BLOB_NAME_SIZE: usize = 64;

/// Maximum bucket name length, including the terminator slot.
pub const MAX_BUCKET_NAME_SIZE: usize = 256;

/// Maximum vbucket name length, including the terminator slot.
pub const MAX_VBUCKET_NAME_SIZE: usize = 256;

fn is_name_too_long(name: &str, max: usize) -> bool {
    if name.len() + 1 >= max {
        warn!(name, max, "name exceeds the maximum name size");
        return true;
    }
    false
}

/// Whether `name` exceeds [`MAX_BLOB_NAME_SIZE`].
#[must_use]
pub fn is_blob_name_too_long(name: &str) -> bool {
    is_name_too_long(name, MAX_BLOB_NAME_SIZE)
}

/// Whether `name` exceeds [`MAX_BUCKET_NAME_SIZE`].
#[must_use]
pub fn is_bucket_name_too_long(name: &str) -> bool {
    is_name_too_long(name, MAX_BUCKET_NAME_SIZE)
}

/// Whether `name` exceeds [`MAX_VBUCKET_NAME_SIZE`].
#[must_use]
pub fn is_vbucket_name_too_long(name: &str) -> bool {
    is_name_too_long(name, MAX_VBUCKET_NAME_SIZE)
}

/// Build the internal map key for a blob: 16 lowercase hex characters of the
/// owning bucket id, most-significant byte first, followed by the name.
#[must_use]
pub fn make_internal_blob_name(name: &str, bucket_id: BucketId) -> String {
    format!("{:016x}{name}", bucket_id.as_u64())
}

const fn build_hex_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 10 {
        table[b'0' as usize + i] = i as u8;
        i += 1;
    }
    let mut j = 0;
    while j < 6 {
        table[b'a' as usize + j] = 10 + j as u8;
        table[b'A' as usize + j] = 10 + j as u8;
        j += 1;
    }
    table
}

static HEX_TABLE: [u8; 256] = build_hex_table();

/// Decode the first [`BUCKET_ID_HEX_LEN`] characters of `s` as hex.
///
/// Bytes outside `0-9a-fA-F` decode as zero; use
/// [`hex_string_to_u64_strict`] to reject them instead.
///
/// # Panics
///
/// Panics if `s` is shorter than [`BUCKET_ID_HEX_LEN`] bytes.
#[must_use]
pub fn hex_string_to_u64(s: &str) -> u64 {
    let mut result = 0u64;
    for &byte in &s.as_bytes()[..BUCKET_ID_HEX_LEN] {
        result = (result << 4) | u64::from(HEX_TABLE[byte as usize]);
    }
    result
}

/// Strict variant of [`hex_string_to_u64`]: returns `None` if `s` is shorter
/// than [`BUCKET_ID_HEX_LEN`] bytes or any of its first 16 bytes is not a
/// hex digit.
#[must_use]
pub fn hex_string_to_u64_strict(s: &str) -> Option<u64> {
    let bytes = s.as_bytes();
    if bytes.len() < BUCKET_ID_HEX_LEN {
        return None;
    }
    let mut result = 0u64;
    for &byte in &bytes[..BUCKET_ID_HEX_LEN] {
        if !byte.is_ascii_hexdigit() {
            return None;
        }
        result = (result << 4) | u64::from(HEX_TABLE[byte as usize]);
    }
    Some(result)
}
