//! # Canonical Record Encoding
//!
//! Every persisted entity and every logged operation goes through
//! `BinaryRecord`. The encoding is bincode's default configuration
//! (little-endian, fixed-width integers), which is stable across restarts and
//! is therefore both the on-disk format and the input of the hash chain.
//!
//! ## Anti-Malleability
//!
//! `from_bytes` rejects trailing bytes: a record must decode from exactly the
//! bytes that were stored, otherwise two different byte strings would map to
//! the same entity and hash differently.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use thiserror::Error;

/// Upper bound on the encoded size of one record.
pub const MAX_RECORD_SIZE: u64 = 64 * 1024 * 1024;

/// Errors from encoding or decoding a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Non-canonical encoding: {remaining} trailing bytes")]
    TrailingBytes { remaining: usize },
}

/// Canonical byte encoding of a record.
pub trait BinaryRecord: Serialize + DeserializeOwned {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode one record from a reader, leaving the reader after the record.
    fn from_reader<R: Read>(reader: R) -> Result<Self, CodecError> {
        bincode::options()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(MAX_RECORD_SIZE)
            .deserialize_from(reader)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Decode a record that must occupy all of `bytes`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = bytes;
        let record = Self::from_reader(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(CodecError::TrailingBytes {
                remaining: cursor.len(),
            });
        }
        Ok(record)
    }
}
