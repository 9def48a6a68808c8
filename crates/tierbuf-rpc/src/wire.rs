//! Wire protocol: one request variant per remote metadata operation, framed
//! as a little-endian u32 length followed by a bincode body.

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tierbuf_common::{BlobId, BucketId, BufferId, MapType, TargetId, VBucketId};

/// Upper bound on a single frame; a frame is at most a full buffer-id or
/// blob-id list plus headers.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// A remote invocation of one `Local*` metadata operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Get {
        key: String,
        map: MapType,
    },
    Put {
        key: String,
        id: u64,
        map: MapType,
    },
    Delete {
        key: String,
        map: MapType,
    },
    GetBlobNameFromId {
        blob_id: BlobId,
    },
    GetBucketIdFromBlobId {
        blob_id: BlobId,
    },
    GetBlobIds {
        bucket_id: BucketId,
    },
    GetOrCreateBucketId {
        name: String,
    },
    GetOrCreateVBucketId {
        name: String,
    },
    AddBlobIdToBucket {
        bucket_id: BucketId,
        blob_id: BlobId,
    },
    AddBlobIdToVBucket {
        vbucket_id: VBucketId,
        blob_id: BlobId,
    },
    AllocateBufferIdList {
        buffer_ids: Vec<BufferId>,
    },
    GetBufferIdList {
        blob_id: BlobId,
    },
    FreeBufferIdList {
        blob_id: BlobId,
    },
    DestroyBlobByName {
        blob_name: String,
        blob_id: BlobId,
        bucket_id: BucketId,
    },
    DestroyBlobById {
        blob_id: BlobId,
        bucket_id: BucketId,
    },
    RemoveBlobFromBucketInfo {
        bucket_id: BucketId,
        blob_id: BlobId,
    },
    ContainsBlob {
        bucket_id: BucketId,
        blob_id: BlobId,
    },
    DestroyBucket {
        name: String,
        bucket_id: BucketId,
    },
    RenameBucket {
        bucket_id: BucketId,
        old_name: String,
        new_name: String,
    },
    DecrementRefcount {
        bucket_id: BucketId,
    },
    DecrementRefcountVBucket {
        vbucket_id: VBucketId,
    },
    GetRemainingTargetCapacity {
        target_id: TargetId,
    },
    GetGlobalDeviceCapacities,
    UpdateGlobalSystemViewState {
        adjustments: Vec<i64>,
    },
    GetNodeTargets,
}

/// Result of a remote invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Unit,
    Bool(bool),
    U32(u32),
    U64(u64),
    Name(String),
    BucketId(BucketId),
    VBucketId(VBucketId),
    BlobIds(Vec<BlobId>),
    BufferIds(Vec<BufferId>),
    TargetIds(Vec<TargetId>),
    Capacities(Vec<u64>),
}

impl Response {
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(value) => Ok(value),
            _ => Err(RpcError::unexpected("Bool")),
        }
    }

    pub fn into_u32(self) -> Result<u32> {
        match self {
            Self::U32(value) => Ok(value),
            _ => Err(RpcError::unexpected("U32")),
        }
    }

    pub fn into_u64(self) -> Result<u64> {
        match self {
            Self::U64(value) => Ok(value),
            _ => Err(RpcError::unexpected("U64")),
        }
    }

    pub fn into_name(self) -> Result<String> {
        match self {
            Self::Name(value) => Ok(value),
            _ => Err(RpcError::unexpected("Name")),
        }
    }

    pub fn into_bucket_id(self) -> Result<BucketId> {
        match self {
            Self::BucketId(value) => Ok(value),
            _ => Err(RpcError::unexpected("BucketId")),
        }
    }

    pub fn into_vbucket_id(self) -> Result<VBucketId> {
        match self {
            Self::VBucketId(value) => Ok(value),
            _ => Err(RpcError::unexpected("VBucketId")),
        }
    }

    pub fn into_blob_ids(self) -> Result<Vec<BlobId>> {
        match self {
            Self::BlobIds(value) => Ok(value),
            _ => Err(RpcError::unexpected("BlobIds")),
        }
    }

    pub fn into_buffer_ids(self) -> Result<Vec<BufferId>> {
        match self {
            Self::BufferIds(value) => Ok(value),
            _ => Err(RpcError::unexpected("BufferIds")),
        }
    }

    pub fn into_target_ids(self) -> Result<Vec<TargetId>> {
        match self {
            Self::TargetIds(value) => Ok(value),
            _ => Err(RpcError::unexpected("TargetIds")),
        }
    }

    pub fn into_capacities(self) -> Result<Vec<u64>> {
        match self {
            Self::Capacities(value) => Ok(value),
            _ => Err(RpcError::unexpected("Capacities")),
        }
    }

    pub fn into_unit(self) -> Result<()> {
        match self {
            Self::Unit => Ok(()),
            _ => Err(RpcError::unexpected("Unit")),
        }
    }
}

/// Write one length-prefixed bincode frame.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, message: &T) -> Result<()> {
    let body = bincode::serde::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| RpcError::Encode(e.to_string()))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge(body.len()));
    }
    let len = (body.len() as u32).to_le_bytes();
    writer
        .write_all(&len)
        .and_then(|()| writer.write_all(&body))
        .and_then(|()| writer.flush())
        .map_err(|source| RpcError::Io { node: 0, source })
}

/// Read one length-prefixed bincode frame. Returns `Ok(None)` on a clean EOF
/// at a frame boundary.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<Option<T>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(source) => return Err(RpcError::Io { node: 0, source }),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .map_err(|source| RpcError::Io { node: 0, source })?;
    let (message, _) = bincode::serde::decode_from_slice(&body, bincode::config::standard())
        .map_err(|e| RpcError::Decode(e.to_string()))?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let request = Request::DestroyBlobByName {
            blob_name: "x".into(),
            blob_id: BlobId::from_parts(2, 7, true),
            bucket_id: BucketId::new(1, 0),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &request).unwrap();
        let decoded: Request = read_frame(&mut buf.as_slice()).unwrap().unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_read_frame_clean_eof() {
        let empty: &[u8] = &[];
        let result: Option<Request> = read_frame(&mut &*empty).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_response_accessors_enforce_variant() {
        assert_eq!(Response::U64(7).into_u64().unwrap(), 7);
        assert!(Response::U64(7).into_bool().is_err());
        assert!(Response::Unit.into_unit().is_ok());
    }
}
