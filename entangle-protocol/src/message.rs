//! Message taxonomy and envelope serialization.
//!
//! Every message serializes to a flat sequence whose first element is the
//! opcode and second element is the message ID:
//!
//! ```text
//! [opcode: u8, message_id: u32, …trailing fields per opcode…]
//! ```
//!
//! Trailing fields per opcode:
//!
//! | Opcode       | Trailing fields                                     |
//! |--------------|-----------------------------------------------------|
//! | Request      | method, arguments, trace flag                       |
//! | Notification | method, arguments                                   |
//! | Response     | result, optional trace                              |
//! | Exception    | namespace, name, description, optional trace        |
//! | NotifyAck    | (none)                                              |
//! | Compressed   | compression method, compressed inner envelope       |

use crate::codec::Decoder;
use crate::compression::CompressionMethod;
use crate::error::ProtocolError;
use crate::opcode::Opcode;
use crate::trace::Trace;
use crate::value;
use rmpv::Value;
use std::fmt;

/// Message ID correlating requests with responses.
///
/// Allocated per connection from an atomic counter; the first allocated ID
/// is 1 and IDs are never recycled within a connection's lifetime. An ID of
/// 0 is never produced by a sender but validates on receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u32);

impl MessageId {
    /// Parses a message ID from a dynamic value.
    pub fn deserialize(input: &Value) -> Result<MessageId, ProtocolError> {
        Ok(MessageId(value::deserialize_u32(input)?))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl From<u32> for MessageId {
    fn from(raw: u32) -> MessageId {
        MessageId(raw)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request expecting a correlated response or exception.
    Request {
        id: MessageId,
        method: String,
        arguments: Vec<Value>,
        /// Whether the peer should record and return an execution trace.
        trace: bool,
    },

    /// Notification; the peer may acknowledge it but sends no result.
    Notification {
        id: MessageId,
        method: String,
        arguments: Vec<Value>,
    },

    /// Successful response to a request.
    Response {
        id: MessageId,
        result: Value,
        trace: Option<Trace>,
    },

    /// Exception raised while serving a request.
    Exception {
        id: MessageId,
        namespace: String,
        name: String,
        description: String,
        trace: Option<Trace>,
    },

    /// Acknowledgement of a notification.
    NotifyAck { id: MessageId },
}

impl Message {
    /// The message's ID. For requests and notifications the ID was assigned
    /// by the sender; for the remaining kinds it echoes the correlated
    /// message.
    pub fn id(&self) -> MessageId {
        match self {
            Message::Request { id, .. }
            | Message::Notification { id, .. }
            | Message::Response { id, .. }
            | Message::Exception { id, .. }
            | Message::NotifyAck { id } => *id,
        }
    }

    /// The opcode the message serializes under.
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::Request { .. } => Opcode::Request,
            Message::Notification { .. } => Opcode::Notification,
            Message::Response { .. } => Opcode::Response,
            Message::Exception { .. } => Opcode::Exception,
            Message::NotifyAck { .. } => Opcode::NotifyAck,
        }
    }

    /// Serializes the message to its envelope value.
    pub fn serialize(&self) -> Value {
        fn serialize_trace(trace: &Option<Trace>) -> Value {
            trace.as_ref().map(Trace::serialize).unwrap_or(Value::Nil)
        }

        let mut items = vec![
            Value::from(self.opcode() as u8),
            Value::from(self.id().as_u32()),
        ];

        match self {
            Message::Request {
                method,
                arguments,
                trace,
                ..
            } => {
                items.push(Value::from(method.as_str()));
                items.push(Value::Array(arguments.clone()));
                items.push(Value::Boolean(*trace));
            }

            Message::Notification {
                method, arguments, ..
            } => {
                items.push(Value::from(method.as_str()));
                items.push(Value::Array(arguments.clone()));
            }

            Message::Response { result, trace, .. } => {
                items.push(result.clone());
                items.push(serialize_trace(trace));
            }

            Message::Exception {
                namespace,
                name,
                description,
                trace,
                ..
            } => {
                items.push(Value::from(namespace.as_str()));
                items.push(Value::from(name.as_str()));
                items.push(Value::from(description.as_str()));
                items.push(serialize_trace(trace));
            }

            Message::NotifyAck { .. } => {}
        }

        Value::Array(items)
    }

    /// Parses a message from an envelope value.
    ///
    /// Failures are [`ProtocolError::InvalidMessageData`] when the value is
    /// not a sequence of at least two elements,
    /// [`ProtocolError::InvalidMessageOpcode`] and
    /// [`ProtocolError::InvalidMessageId`] when the leading elements do not
    /// validate, and [`ProtocolError::BadMessage`] for any trailing-field
    /// violation. Only the last is recoverable.
    pub fn deserialize(input: &Value) -> Result<Message, ProtocolError> {
        let items = match input {
            Value::Array(items) => items,
            _ => return Err(ProtocolError::InvalidMessageData),
        };

        if items.len() < 2 {
            return Err(ProtocolError::InvalidMessageData);
        }

        let opcode =
            Opcode::deserialize(&items[0]).map_err(|_| ProtocolError::InvalidMessageOpcode)?;
        let id = MessageId::deserialize(&items[1]).map_err(|_| ProtocolError::InvalidMessageId)?;

        Message::deserialize_fields(opcode, id, &items[2..])
    }

    fn deserialize_fields(
        opcode: Opcode,
        id: MessageId,
        fields: &[Value],
    ) -> Result<Message, ProtocolError> {
        match opcode {
            Opcode::Request => {
                if fields.len() != 3 {
                    return Err(ProtocolError::BadMessage);
                }

                Ok(Message::Request {
                    id,
                    method: parse_method(&fields[0])?,
                    arguments: parse_arguments(&fields[1])?,
                    trace: value::deserialize_bool(&fields[2])
                        .map_err(|_| ProtocolError::BadMessage)?,
                })
            }

            Opcode::Notification => {
                if fields.len() != 2 {
                    return Err(ProtocolError::BadMessage);
                }

                Ok(Message::Notification {
                    id,
                    method: parse_method(&fields[0])?,
                    arguments: parse_arguments(&fields[1])?,
                })
            }

            Opcode::Response => {
                if fields.len() != 2 {
                    return Err(ProtocolError::BadMessage);
                }

                Ok(Message::Response {
                    id,
                    result: fields[0].clone(),
                    trace: parse_trace(&fields[1])?,
                })
            }

            Opcode::Exception => {
                if fields.len() != 4 {
                    return Err(ProtocolError::BadMessage);
                }

                let parse_text =
                    |v: &Value| value::deserialize_string(v).map_err(|_| ProtocolError::BadMessage);

                Ok(Message::Exception {
                    id,
                    namespace: parse_text(&fields[0])?,
                    name: parse_text(&fields[1])?,
                    description: parse_text(&fields[2])?,
                    trace: parse_trace(&fields[3])?,
                })
            }

            Opcode::NotifyAck => {
                if !fields.is_empty() {
                    return Err(ProtocolError::BadMessage);
                }

                Ok(Message::NotifyAck { id })
            }

            Opcode::Compressed => {
                if fields.len() != 2 {
                    return Err(ProtocolError::BadMessage);
                }

                let method = CompressionMethod::deserialize(&fields[0])
                    .map_err(|_| ProtocolError::BadMessage)?;
                let payload =
                    value::deserialize_binary(&fields[1]).map_err(|_| ProtocolError::BadMessage)?;
                let decompressed = method
                    .decompress(&payload)
                    .map_err(|_| ProtocolError::BadMessage)?;

                // The payload carries one full inner envelope; its ID wins
                // over the informational outer ID. Nested compression takes
                // this same path again.
                let mut decoder = Decoder::new();
                decoder.extend(&decompressed);
                match decoder.decode_value()? {
                    Some(inner) => Message::deserialize(&inner),
                    None => Err(ProtocolError::InvalidMessageData),
                }
            }
        }
    }

    /// Serializes the message and rewraps it as a compressed envelope
    /// carrying the same message ID.
    pub fn serialize_compressed(
        &self,
        method: CompressionMethod,
        serialized: &[u8],
    ) -> Result<Value, ProtocolError> {
        let compressed = method.compress(serialized)?;

        Ok(Value::Array(vec![
            Value::from(Opcode::Compressed as u8),
            Value::from(self.id().as_u32()),
            Value::from(method as u8),
            Value::from(compressed),
        ]))
    }
}

fn parse_method(input: &Value) -> Result<String, ProtocolError> {
    let method = value::deserialize_string(input).map_err(|_| ProtocolError::BadMessage)?;
    if method.is_empty() {
        return Err(ProtocolError::BadMessage);
    }
    Ok(method)
}

fn parse_arguments(input: &Value) -> Result<Vec<Value>, ProtocolError> {
    match input {
        Value::Array(arguments) => Ok(arguments.clone()),
        _ => Err(ProtocolError::BadMessage),
    }
}

fn parse_trace(input: &Value) -> Result<Option<Trace>, ProtocolError> {
    match input {
        Value::Nil => Ok(None),
        other => Trace::deserialize(other)
            .map(Some)
            .map_err(|_| ProtocolError::BadMessage),
    }
}
