//! Encoder and decoder for envelope values.
//!
//! Envelopes are self-delimiting MessagePack values; there is no outer
//! length prefix. The decoder buffers raw transport bytes and parses one
//! complete value at a time off the front of the buffer.

use crate::error::ProtocolError;
use bytes::BytesMut;
use rmpv::Value;
use std::io::{self, Cursor};

/// Encodes envelope values into bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes a value into its MessagePack representation.
    pub fn encode(value: &Value) -> Result<Vec<u8>, ProtocolError> {
        let mut data = Vec::new();
        rmpv::encode::write_value(&mut data, value)?;
        Ok(data)
    }
}

/// Decodes envelope values from buffered transport bytes.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends raw bytes to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Attempts to decode the next complete value from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds only a prefix of a value
    /// (more transport bytes are needed). Malformed data fails with
    /// [`ProtocolError::InvalidMessageData`]; the buffer contents are
    /// unspecified afterwards.
    pub fn decode_value(&mut self) -> Result<Option<Value>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                let _ = self.buffer.split_to(consumed);
                Ok(Some(value))
            }
            Err(err) => {
                let err: io::Error = err.into();
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    Ok(None)
                } else {
                    Err(ProtocolError::InvalidMessageData)
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
