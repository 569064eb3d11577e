//! Client error types.

use entangle_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection is shut down: either closed locally or torn down
    /// after the peer disconnected.
    #[error("connection is shut down")]
    Shutdown,

    /// A protocol-level failure on the underlying connection.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ClientError::Shutdown.to_string(), "connection is shut down");
        assert_eq!(
            ClientError::from(ProtocolError::BadMessage).to_string(),
            "bad message received"
        );
    }
}
