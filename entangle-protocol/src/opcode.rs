//! Message opcodes.

use crate::error::ProtocolError;
use crate::value;
use rmpv::Value;
use std::fmt;

/// Wire opcode identifying the kind of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Request expecting a response or exception.
    Request = 0,

    /// Fire-and-forget (or acknowledged) notification.
    Notification = 1,

    /// Response correlated to a request.
    Response = 2,

    /// Exception correlated to a request.
    Exception = 3,

    /// Notification acknowledgement.
    NotifyAck = 4,

    /// Envelope wrapping a compressed inner envelope.
    Compressed = 0x7f,
}

impl Opcode {
    /// Returns the opcode for a raw tag, or `None` if the tag is not a
    /// defined opcode.
    pub fn from_u8(raw: u8) -> Option<Opcode> {
        match raw {
            0 => Some(Opcode::Request),
            1 => Some(Opcode::Notification),
            2 => Some(Opcode::Response),
            3 => Some(Opcode::Exception),
            4 => Some(Opcode::NotifyAck),
            0x7f => Some(Opcode::Compressed),
            _ => None,
        }
    }

    /// Parses an opcode from a dynamic value.
    pub fn deserialize(input: &Value) -> Result<Opcode, ProtocolError> {
        Opcode::from_u8(value::deserialize_u8(input)?).ok_or(ProtocolError::Deserialization)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Request => write!(f, "request"),
            Opcode::Notification => write!(f, "notification"),
            Opcode::Response => write!(f, "response"),
            Opcode::Exception => write!(f, "exception"),
            Opcode::NotifyAck => write!(f, "notification acknowledgement"),
            Opcode::Compressed => write!(f, "compressed message"),
        }
    }
}
