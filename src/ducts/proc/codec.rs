//! Value ↔ byte conversion for process-crossing ducts.
//!
//! [`PodCodec`] copies plain-old-data values verbatim and has a fixed wire
//! length, which is what lets a receive ring pre-post buffers.
//! [`BincodeCodec`] handles arbitrary serde types at variable length.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::conduit_error::ConduitError;

pub trait Codec<T>: Clone + Send + Sync + 'static {
    /// Exact encoded length, if every value encodes to the same size.
    fn fixed_len(&self) -> Option<usize> {
        None
    }

    fn encode(&self, val: &T) -> Result<Bytes, ConduitError>;

    fn decode(&self, bytes: &[u8]) -> Result<T, ConduitError>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PodCodec;

impl<T: bytemuck::Pod> Codec<T> for PodCodec {
    fn fixed_len(&self) -> Option<usize> {
        Some(std::mem::size_of::<T>())
    }

    fn encode(&self, val: &T) -> Result<Bytes, ConduitError> {
        Ok(Bytes::copy_from_slice(bytemuck::bytes_of(val)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ConduitError> {
        let expected = std::mem::size_of::<T>();
        if bytes.len() != expected {
            return Err(ConduitError::Decode(format!(
                "expected {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BincodeCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for BincodeCodec {
    fn encode(&self, val: &T) -> Result<Bytes, ConduitError> {
        bincode::serialize(val)
            .map(Bytes::from)
            .map_err(|e| ConduitError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ConduitError> {
        bincode::deserialize(bytes).map_err(|e| ConduitError::Decode(e.to_string()))
    }
}

/// Encode for a live duct; a value that cannot be encoded is a bug in the
/// caller's choice of codec.
#[track_caller]
pub(crate) fn encode_or_panic<T, K: Codec<T>>(codec: &K, val: &T) -> Bytes {
    match codec.encode(val) {
        Ok(bytes) => bytes,
        Err(e) => panic!("{e}"),
    }
}

#[track_caller]
pub(crate) fn decode_or_panic<T, K: Codec<T>>(codec: &K, bytes: &[u8]) -> T {
    match codec.decode(bytes) {
        Ok(val) => val,
        Err(e) => panic!("{e}"),
    }
}
