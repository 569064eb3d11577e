//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during envelope framing, field
/// deserialization or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The received data is not a valid envelope: not a sequence, fewer than
    /// two elements, or malformed codec data. Unrecoverable.
    #[error("invalid message data received")]
    InvalidMessageData,

    /// The envelope's first element is not a defined opcode. Unrecoverable.
    #[error("invalid message opcode received")]
    InvalidMessageOpcode,

    /// The envelope's second element is not an unsigned 32-bit message ID.
    /// Unrecoverable.
    #[error("invalid message ID received")]
    InvalidMessageId,

    /// A structurally valid envelope carried type-invalid trailing fields.
    /// Recoverable: the framing remains aligned and the next receive may
    /// succeed.
    #[error("bad message received")]
    BadMessage,

    /// A dynamic value could not be narrowed to the requested type.
    #[error("deserialization error")]
    Deserialization,

    /// The transport reached end-of-stream, or the connection was closed
    /// locally.
    #[error("connection closed")]
    ConnectionClosed,

    /// Value encoding failed.
    #[error("value encoding failed: {0}")]
    Encode(#[from] rmpv::encode::Error),

    /// Compression or decompression failed on the send path.
    #[error("compression error: {0}")]
    Compression(#[from] snap::Error),

    /// I/O error while writing to the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the connection may keep receiving after this error.
    ///
    /// Only [`ProtocolError::BadMessage`] leaves the framing aligned; every
    /// other receive error means the connection should be abandoned.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::BadMessage)
    }
}
