//! # entangle-protocol
//!
//! Wire protocol implementation for Entangle RPC.
//!
//! This crate provides:
//! - Narrowing conversions from decoded dynamic values to concrete types
//! - Opcode, message ID and message envelope types
//! - Hierarchical execution traces
//! - Remote exceptions as plain (namespace, name, description) values
//! - Transparent Snappy compression for oversized envelopes
//! - An incremental decoder for the self-delimiting envelope stream
//!
//! Envelopes are MessagePack-encoded top-level arrays; the transport layer
//! lives in `entangle-client`.

pub mod codec;
pub mod compression;
pub mod error;
pub mod exception;
pub mod message;
pub mod opcode;
pub mod trace;
pub mod value;

pub use codec::{Decoder, Encoder};
pub use compression::{CompressionMethod, COMPRESSION_THRESHOLD};
pub use error::ProtocolError;
pub use exception::{Exception, ExceptionDefinition};
pub use message::{Message, MessageId};
pub use opcode::Opcode;
pub use trace::Trace;

// The dynamic value type every payload is expressed in.
pub use rmpv::Value;
