//! # entangle-client
//!
//! Framed connections and client-side call multiplexing for Entangle RPC.
//!
//! This crate provides:
//! - [`Connection`]: a framed message connection over any byte-oriented
//!   reliable transport, with per-peer write serialization and transparent
//!   compression of oversized frames
//! - [`ClientConnHandler`]: request/response correlation over a connection,
//!   with clean shutdown propagation to every outstanding call

pub mod connection;
pub mod error;
pub mod handler;

pub use connection::{Connection, Transport};
pub use error::ClientError;
pub use handler::ClientConnHandler;
