//! Framed message connections.

use entangle_protocol::{
    CompressionMethod, Decoder, Encoder, Exception, Message, MessageId, ProtocolError, Trace,
    Value, COMPRESSION_THRESHOLD,
};
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::{broadcast, Mutex};

/// Byte-oriented reliable transport a connection runs over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// Read buffer size for transport reads (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

struct ReadState {
    reader: ReadHalf<BoxedTransport>,
    decoder: Decoder,
}

/// A framed message connection over a byte-oriented transport.
///
/// Receiving is only safe from one task at a time; concurrent receivers are
/// serialized but their interleaving is unspecified. Sending is safe from
/// any number of tasks: an exclusive write latch is held from the first
/// byte of a frame until the flush, so concurrent senders never interleave
/// frames on the wire.
pub struct Connection {
    /// Human-readable description of the peer, used in logs.
    description: String,

    /// Read half and its bound decoder; the latch enforces the
    /// single-reader discipline.
    read: Mutex<ReadState>,

    /// Write half behind the exclusive write latch.
    writer: Mutex<BufWriter<WriteHalf<BoxedTransport>>>,

    /// Message ID counter. The first allocated ID is 1.
    message_id_counter: AtomicU32,

    /// Set once `close` has run.
    closed: AtomicBool,

    /// Wakes a blocked receiver when the connection is closed locally.
    close_signal: broadcast::Sender<()>,
}

impl Connection {
    /// Creates a connection over a transport.
    pub fn new(transport: impl Transport + 'static, description: impl Into<String>) -> Connection {
        let (reader, writer) = tokio::io::split(Box::new(transport) as BoxedTransport);
        let (close_signal, _) = broadcast::channel(1);

        Connection {
            description: description.into(),
            read: Mutex::new(ReadState {
                reader,
                decoder: Decoder::new(),
            }),
            writer: Mutex::new(BufWriter::new(writer)),
            message_id_counter: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            close_signal,
        }
    }

    /// Human-readable description of the connection.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Closes the connection. Idempotent; a blocked [`Connection::receive`]
    /// wakes with [`ProtocolError::ConnectionClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.close_signal.send(());

        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            tracing::debug!(
                connection = %self.description,
                error = %err,
                "transport shutdown failed"
            );
        }
    }

    /// Receives one message.
    ///
    /// The error is [`ProtocolError::ConnectionClosed`] on end-of-stream or
    /// local close, [`ProtocolError::InvalidMessageData`],
    /// [`ProtocolError::InvalidMessageOpcode`] or
    /// [`ProtocolError::InvalidMessageId`] on an unrecoverable envelope,
    /// and [`ProtocolError::BadMessage`] when a single message failed field
    /// validation; only after the last may receiving continue.
    pub async fn receive(&self) -> Result<Message, ProtocolError> {
        let mut close_signal = self.close_signal.subscribe();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionClosed);
        }

        let mut read = self.read.lock().await;
        let ReadState { reader, decoder } = &mut *read;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            if let Some(envelope) = decoder.decode_value()? {
                return Message::deserialize(&envelope);
            }

            let n = tokio::select! {
                result = reader.read(&mut buf) => match result {
                    Ok(n) => n,
                    Err(err) => {
                        tracing::debug!(
                            connection = %self.description,
                            error = %err,
                            "transport read failed"
                        );
                        return Err(ProtocolError::InvalidMessageData);
                    }
                },
                _ = close_signal.recv() => return Err(ProtocolError::ConnectionClosed),
            };

            if n == 0 {
                return if decoder.buffered() == 0 {
                    Err(ProtocolError::ConnectionClosed)
                } else {
                    // The stream ended inside an envelope.
                    Err(ProtocolError::InvalidMessageData)
                };
            }

            decoder.extend(&buf[..n]);
        }
    }

    /// Sends a request and returns the allocated message ID.
    pub async fn send_request(
        &self,
        method: &str,
        arguments: Vec<Value>,
        trace: bool,
    ) -> Result<MessageId, ProtocolError> {
        let id = self.next_message_id();
        tracing::trace!(
            connection = %self.description,
            message_id = %id,
            method,
            "sending request"
        );

        self.send(&Message::Request {
            id,
            method: method.to_string(),
            arguments,
            trace,
        })
        .await?;

        Ok(id)
    }

    /// Sends a notification and returns the allocated message ID.
    pub async fn send_notification(
        &self,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<MessageId, ProtocolError> {
        let id = self.next_message_id();
        tracing::trace!(
            connection = %self.description,
            message_id = %id,
            method,
            "sending notification"
        );

        self.send(&Message::Notification {
            id,
            method: method.to_string(),
            arguments,
        })
        .await?;

        Ok(id)
    }

    /// Sends a response correlated to a previously received message.
    pub async fn respond_response(
        &self,
        result: Value,
        respond_to: &Message,
        trace: Option<Trace>,
    ) -> Result<(), ProtocolError> {
        self.send(&Message::Response {
            id: respond_to.id(),
            result,
            trace,
        })
        .await
    }

    /// Sends an exception correlated to a previously received message.
    ///
    /// An error that is not an [`Exception`] goes on the wire as
    /// `entangle.InternalServerError` carrying its textual description.
    pub async fn respond_exception(
        &self,
        error: &(dyn Error + Send + Sync + 'static),
        respond_to: &Message,
        trace: Option<Trace>,
    ) -> Result<(), ProtocolError> {
        let exception = Exception::from_error(error);

        self.send(&Message::Exception {
            id: respond_to.id(),
            namespace: exception.namespace().to_string(),
            name: exception.name().to_string(),
            description: exception.description().to_string(),
            trace,
        })
        .await
    }

    /// Acknowledges a notification.
    pub async fn acknowledge_notification(
        &self,
        respond_to: &Message,
    ) -> Result<(), ProtocolError> {
        self.send(&Message::NotifyAck {
            id: respond_to.id(),
        })
        .await
    }

    fn next_message_id(&self) -> MessageId {
        MessageId::from(
            self.message_id_counter
                .fetch_add(1, Ordering::SeqCst)
                .wrapping_add(1),
        )
    }

    /// Serializes and writes a message, compressing it first when the
    /// serialized envelope reaches the compression threshold.
    ///
    /// Serialization and compression run outside the write latch to keep
    /// the latch window short.
    async fn send(&self, message: &Message) -> Result<(), ProtocolError> {
        let data = Encoder::encode(&message.serialize())?;

        if data.len() >= COMPRESSION_THRESHOLD {
            return self
                .send_compressed(message, data, CompressionMethod::Snappy)
                .await;
        }

        self.write_frame(&data).await
    }

    async fn send_compressed(
        &self,
        message: &Message,
        serialized: Vec<u8>,
        method: CompressionMethod,
    ) -> Result<(), ProtocolError> {
        tracing::trace!(
            connection = %self.description,
            message_id = %message.id(),
            %method,
            uncompressed_bytes = serialized.len(),
            "compressing oversized frame"
        );

        let envelope = message.serialize_compressed(method, &serialized)?;
        self.write_frame(&Encoder::encode(&envelope)?).await
    }

    /// Writes one frame under the exclusive write latch, flushing before
    /// the latch is released.
    async fn write_frame(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entangle_protocol::exception;
    use std::io;
    use std::sync::Arc;

    fn connection_pair() -> (Connection, Connection) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            Connection::new(client, "test client"),
            Connection::new(server, "test server"),
        )
    }

    async fn receive_raw(data: &[u8]) -> Result<Message, ProtocolError> {
        let (mut peer, ours) = tokio::io::duplex(1024);
        let conn = Connection::new(ours, "test");

        peer.write_all(data).await.unwrap();
        peer.shutdown().await.unwrap();

        conn.receive().await
    }

    #[tokio::test]
    async fn test_receive_low_level_failures() {
        // Not a sequence.
        assert!(matches!(
            receive_raw(&[0x00]).await,
            Err(ProtocolError::InvalidMessageData)
        ));

        // Sequences of fewer than two elements.
        assert!(matches!(
            receive_raw(&[0x90]).await,
            Err(ProtocolError::InvalidMessageData)
        ));
        assert!(matches!(
            receive_raw(&[0x91, 0xc0]).await,
            Err(ProtocolError::InvalidMessageData)
        ));

        // Opcode as a string, then as a boolean.
        assert!(matches!(
            receive_raw(&[0x92, 0xa0, 0x01]).await,
            Err(ProtocolError::InvalidMessageOpcode)
        ));
        assert!(matches!(
            receive_raw(&[0x92, 0xc3, 0x01]).await,
            Err(ProtocolError::InvalidMessageOpcode)
        ));

        // Message ID as a string, a negative 32-bit integer and an
        // out-of-range 64-bit integer.
        assert!(matches!(
            receive_raw(&[0x92, 0x00, 0xa1, 0x30]).await,
            Err(ProtocolError::InvalidMessageId)
        ));
        assert!(matches!(
            receive_raw(&[0x92, 0x00, 0xd2, 0xff, 0xff, 0xff, 0xff]).await,
            Err(ProtocolError::InvalidMessageId)
        ));
        assert!(matches!(
            receive_raw(&[0x92, 0x00, 0xcf, 0x55, 0x12, 0xc5, 0x16, 0x55, 0x12, 0xc5, 0x16]).await,
            Err(ProtocolError::InvalidMessageId)
        ));

        // Valid opcode and message ID with no trailing fields.
        assert!(matches!(
            receive_raw(&[0x92, 0x00, 0x00]).await,
            Err(ProtocolError::BadMessage)
        ));
    }

    #[tokio::test]
    async fn test_receive_eof() {
        assert!(matches!(
            receive_raw(&[]).await,
            Err(ProtocolError::ConnectionClosed)
        ));

        // End-of-stream inside an envelope is not a clean EOF.
        assert!(matches!(
            receive_raw(&[0x92, 0x00]).await,
            Err(ProtocolError::InvalidMessageData)
        ));
    }

    #[tokio::test]
    async fn test_send_request_receive() {
        let (client, server) = connection_pair();

        for (arguments, trace) in [
            (vec![], false),
            (vec![], true),
            (vec![Value::from("Foo"), Value::from(123i64)], false),
            (vec![Value::from("Foo"), Value::from(123i64)], true),
        ] {
            let sent_id = client
                .send_request("MethodName", arguments.clone(), trace)
                .await
                .unwrap();

            let received = server.receive().await.unwrap();
            assert_eq!(received.id(), sent_id);
            assert_eq!(
                received,
                Message::Request {
                    id: sent_id,
                    method: "MethodName".to_string(),
                    arguments,
                    trace,
                }
            );
        }
    }

    #[tokio::test]
    async fn test_send_notification_receive() {
        let (client, server) = connection_pair();

        let sent_id = client
            .send_notification("MethodName", vec![Value::from("Foo")])
            .await
            .unwrap();

        assert_eq!(
            server.receive().await.unwrap(),
            Message::Notification {
                id: sent_id,
                method: "MethodName".to_string(),
                arguments: vec![Value::from("Foo")],
            }
        );
    }

    #[tokio::test]
    async fn test_message_id_allocation() {
        let (client, server) = connection_pair();

        let first = client.send_request("A", vec![], false).await.unwrap();
        let second = client.send_notification("B", vec![]).await.unwrap();

        assert_eq!(first.as_u32(), 1);
        assert_eq!(second.as_u32(), first.as_u32() + 1);

        server.receive().await.unwrap();
        server.receive().await.unwrap();
    }

    #[tokio::test]
    async fn test_respond_response_receive() {
        let (client, server) = connection_pair();

        let request = Message::Request {
            id: MessageId::from(123),
            method: "MethodName".to_string(),
            arguments: vec![],
            trace: false,
        };

        let trace = Trace::new_root("serve");
        trace.end();

        for (result, trace) in [
            (Value::Nil, None),
            (Value::from("Test"), None),
            (Value::from(12346u64), Some(trace.clone())),
            (
                Value::Array(vec![Value::from("Hello"), Value::from(123i64)]),
                Some(trace),
            ),
        ] {
            server
                .respond_response(result.clone(), &request, trace.clone())
                .await
                .unwrap();

            assert_eq!(
                client.receive().await.unwrap(),
                Message::Response {
                    id: MessageId::from(123),
                    result,
                    trace,
                }
            );
        }
    }

    #[tokio::test]
    async fn test_respond_exception_receive() {
        let (client, server) = connection_pair();

        let request = Message::Request {
            id: MessageId::from(123),
            method: "MethodName".to_string(),
            arguments: vec![],
            trace: true,
        };

        let definition = entangle_protocol::ExceptionDefinition::new("testing", "TestError");
        let raised = definition.raise("something went awry");
        server
            .respond_exception(&raised, &request, None)
            .await
            .unwrap();

        assert_eq!(
            client.receive().await.unwrap(),
            Message::Exception {
                id: MessageId::from(123),
                namespace: "testing".to_string(),
                name: "TestError".to_string(),
                description: "something went awry".to_string(),
                trace: None,
            }
        );
    }

    #[tokio::test]
    async fn test_respond_exception_adapts_foreign_errors() {
        let (client, server) = connection_pair();

        let request = Message::Request {
            id: MessageId::from(5),
            method: "MethodName".to_string(),
            arguments: vec![],
            trace: false,
        };

        let error = io::Error::new(io::ErrorKind::Other, "non-entangle error");
        server
            .respond_exception(&error, &request, None)
            .await
            .unwrap();

        match client.receive().await.unwrap() {
            Message::Exception {
                namespace,
                name,
                description,
                ..
            } => {
                let adapted = Exception::new(namespace, name, description);
                assert!(adapted.is(&exception::INTERNAL_SERVER_ERROR));
                assert_eq!(adapted.description(), "non-entangle error");
            }
            other => panic!("expected exception, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acknowledge_notification_receive() {
        let (client, server) = connection_pair();

        let notification = Message::Notification {
            id: MessageId::from(123),
            method: "MethodName".to_string(),
            arguments: vec![],
        };

        server.acknowledge_notification(&notification).await.unwrap();

        assert_eq!(
            client.receive().await.unwrap(),
            Message::NotifyAck {
                id: MessageId::from(123),
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_compressed_transparently() {
        let (client, server) = connection_pair();

        // Well past the threshold once serialized.
        let arguments = vec![Value::from("x".repeat(COMPRESSION_THRESHOLD * 2))];

        let sent_id = client
            .send_request("MethodName", arguments.clone(), false)
            .await
            .unwrap();

        assert_eq!(
            server.receive().await.unwrap(),
            Message::Request {
                id: sent_id,
                method: "MethodName".to_string(),
                arguments,
                trace: false,
            }
        );
    }

    #[tokio::test]
    async fn test_explicitly_compressed_frame() {
        let (client, server) = connection_pair();

        let message = Message::Request {
            id: MessageId::from(77),
            method: "MethodName".to_string(),
            arguments: vec![Value::from("Foo"), Value::from(123i64)],
            trace: true,
        };

        let serialized = Encoder::encode(&message.serialize()).unwrap();
        client
            .send_compressed(&message, serialized, CompressionMethod::Snappy)
            .await
            .unwrap();

        assert_eq!(server.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_bad_message_is_recoverable() {
        let (mut peer, ours) = tokio::io::duplex(1024);
        let conn = Connection::new(ours, "test");

        // A structurally valid envelope with a missing field table, then a
        // well-formed request.
        peer.write_all(&[0x92, 0x00, 0x01]).await.unwrap();
        let request = Message::Request {
            id: MessageId::from(2),
            method: "MethodName".to_string(),
            arguments: vec![],
            trace: false,
        };
        peer.write_all(&Encoder::encode(&request.serialize()).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            conn.receive().await,
            Err(ProtocolError::BadMessage)
        ));
        assert_eq!(conn.receive().await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receiver() {
        let (client, _server) = connection_pair();
        let client = Arc::new(client);

        let receiver = {
            let client = client.clone();
            tokio::spawn(async move { client.receive().await })
        };

        // Let the receiver block on the transport before closing.
        tokio::task::yield_now().await;
        client.close().await;

        assert!(matches!(
            receiver.await.unwrap(),
            Err(ProtocolError::ConnectionClosed)
        ));

        // Receiving after close fails immediately, and close is idempotent.
        assert!(matches!(
            client.receive().await,
            Err(ProtocolError::ConnectionClosed)
        ));
        client.close().await;
    }

    #[tokio::test]
    async fn test_description() {
        let (client, server) = connection_pair();
        assert_eq!(client.description(), "test client");
        assert_eq!(server.description(), "test server");
    }
}
