//! Payload compression for oversized envelopes.

use crate::error::ProtocolError;
use crate::value;
use rmpv::Value;
use std::fmt;

/// Serialized envelopes at least this long are rewrapped as compressed
/// envelopes before hitting the wire. Five times a typical Ethernet MSS of
/// 1460 bytes.
pub const COMPRESSION_THRESHOLD: usize = 1460 * 5;

/// Compression method for the payload of a compressed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionMethod {
    /// Snappy block compression.
    Snappy = 0,
}

impl CompressionMethod {
    /// Returns the method for a raw tag, or `None` if the tag is not a
    /// defined compression method.
    pub fn from_u8(raw: u8) -> Option<CompressionMethod> {
        match raw {
            0 => Some(CompressionMethod::Snappy),
            _ => None,
        }
    }

    /// Parses a compression method from a dynamic value.
    pub fn deserialize(input: &Value) -> Result<CompressionMethod, ProtocolError> {
        CompressionMethod::from_u8(value::deserialize_u8(input)?)
            .ok_or(ProtocolError::Deserialization)
    }

    /// Compresses a serialized envelope.
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            CompressionMethod::Snappy => Ok(snap::raw::Encoder::new().compress_vec(input)?),
        }
    }

    /// Decompresses the payload of a compressed envelope.
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        match self {
            CompressionMethod::Snappy => Ok(snap::raw::Decoder::new().decompress_vec(input)?),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMethod::Snappy => write!(f, "Snappy"),
        }
    }
}
