//! Client-side call multiplexing.

use crate::connection::Connection;
use crate::error::ClientError;
use entangle_protocol::{Message, MessageId, ProtocolError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

#[derive(Default)]
struct HandlerState {
    /// `close` was called locally.
    closing: bool,

    /// The receive pump has terminated and the pending table is drained.
    shutdown: bool,
}

struct HandlerShared {
    conn: Connection,

    /// Outstanding requests awaiting their correlated reply.
    pending: Mutex<HashMap<MessageId, oneshot::Sender<Message>>>,

    state: Mutex<HandlerState>,
}

/// Client connection handler.
///
/// Correlates responses to outstanding requests over a [`Connection`]. A
/// background receive pump, started at construction, routes every incoming
/// response or exception to the caller waiting on its message ID; anything
/// else received on a client connection is ignored.
///
/// Lock order: the pending-table lock is acquired before the state lock
/// when both are needed (call admission and the shutdown drain); every
/// other path takes at most one of the two.
pub struct ClientConnHandler {
    shared: Arc<HandlerShared>,
}

impl ClientConnHandler {
    /// Creates a handler over a connection and starts its receive pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(conn: Connection) -> ClientConnHandler {
        let shared = Arc::new(HandlerShared {
            conn,
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(HandlerState::default()),
        });

        tokio::spawn(receive_loop(shared.clone()));

        ClientConnHandler { shared }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.shared.conn
    }

    /// Calls a remote method.
    ///
    /// With `notify` set this sends a notification and returns `Ok(None)`
    /// immediately. Otherwise it sends a request and suspends until the
    /// correlated response or exception message arrives; there is no
    /// built-in timeout, and closing the handler (or losing the peer) wakes
    /// the caller with [`ClientError::Shutdown`].
    pub async fn call(
        &self,
        method: &str,
        arguments: Vec<Value>,
        notify: bool,
        trace: bool,
    ) -> Result<Option<Message>, ClientError> {
        // The pending lock is held across the state check, the send and the
        // table insert so that the shutdown drain cannot slip between them:
        // the drain flips `shutdown` while holding both locks, so a caller
        // seeing it unset here is guaranteed its entry gets drained.
        let mut pending = self.shared.pending.lock().await;

        {
            let state = self.shared.state.lock().await;
            if state.closing || state.shutdown {
                return Err(ClientError::Shutdown);
            }
        }

        let sent = if notify {
            self.shared.conn.send_notification(method, arguments).await
        } else {
            self.shared.conn.send_request(method, arguments, trace).await
        };

        let message_id = match sent {
            Ok(message_id) => message_id,
            Err(ProtocolError::ConnectionClosed) => return Err(ClientError::Shutdown),
            Err(err) => return Err(err.into()),
        };

        if notify {
            return Ok(None);
        }

        let (slot, reply) = oneshot::channel();
        pending.insert(message_id, slot);
        drop(pending);

        // A dropped slot is the shutdown sentinel.
        match reply.await {
            Ok(message) => Ok(Some(message)),
            Err(_) => Err(ClientError::Shutdown),
        }
    }

    /// Closes the handler and its connection.
    ///
    /// Pending callers wake with [`ClientError::Shutdown`] once the receive
    /// pump drains. Returns [`ClientError::Shutdown`] if the handler is
    /// already closing or shut down.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut state = self.shared.state.lock().await;
        if state.closing || state.shutdown {
            return Err(ClientError::Shutdown);
        }
        state.closing = true;

        self.shared.conn.close().await;
        Ok(())
    }

    /// Returns the number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared
            .pending
            .try_lock()
            .map(|pending| pending.len())
            .unwrap_or(0)
    }
}

/// Receives messages and routes them to waiting callers until the
/// connection fails, then drains the pending table.
async fn receive_loop(shared: Arc<HandlerShared>) {
    loop {
        let message = match shared.conn.receive().await {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(
                    connection = shared.conn.description(),
                    error = %err,
                    "receive pump terminated"
                );
                break;
            }
        };

        // Only responses and exceptions carry a reply for a caller.
        let message_id = match &message {
            Message::Response { id, .. } | Message::Exception { id, .. } => *id,
            other => {
                tracing::trace!(
                    connection = shared.conn.description(),
                    opcode = %other.opcode(),
                    "ignoring non-reply message"
                );
                continue;
            }
        };

        let slot = shared.pending.lock().await.remove(&message_id);
        match slot {
            Some(slot) => {
                let _ = slot.send(message);
            }
            None => {
                tracing::trace!(
                    connection = shared.conn.description(),
                    message_id = %message_id,
                    "dropping reply with no pending call"
                );
            }
        }
    }

    // Drain under both locks so that a concurrent call cannot insert after
    // the drain but before the pump exits. Dropping the slots wakes every
    // waiting caller with the shutdown sentinel.
    let mut pending = shared.pending.lock().await;
    let mut state = shared.state.lock().await;

    state.shutdown = true;
    pending.clear();
}
