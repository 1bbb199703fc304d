//! Network layer between the coordinator and its miners.
//!
//! A plain TCP (or TLS) stream carries length-prefixed bincode frames. Each
//! frame is a [`Message`]: a command code plus opaque data. The only core
//! command forwards coordinator events; new codes can be added without
//! touching the framing.
//!
//! - [`Server`] accepts connections forever, one read loop task per connection
//! - [`Client`] dials a server and runs the same read loop
//! - [`ConnectionHandler`] receives connect, message and close callbacks

mod client;
mod codec;
mod connection;
mod server;

pub use client::Client;
pub use codec::{encode_frame, read_message, write_message, MAX_FRAME_LEN};
pub use connection::Connection;
pub use server::{ConnectionRegistry, Server, TLS_HANDSHAKE_TIMEOUT};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command codes
pub mod commands {
    /// Forward a coordinator event to the other side
    pub const EVENT_FORWARD: u32 = 1;
}

/// Network errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Socket failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Message could not be encoded
    #[error("encode error: {0}")]
    Encode(String),
    /// Frame body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
    /// Frame length above the limit
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Announced length
        len: usize,
        /// Limit
        max: usize,
    },
    /// The connection is already closed
    #[error("connection closed")]
    Closed,
    /// Message carries another command than the one asked for
    #[error("unexpected command {0}")]
    UnexpectedCommand(u32),
    /// TLS handshake or configuration failure
    #[error("tls error: {0}")]
    Tls(String),
}

/// Events the coordinator pushes to miners
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    /// A new interval began; abandon the previous one and start mining
    IntervalStarted {
        /// Directory block height
        height: i32,
        /// Minute within the block
        minute: u8,
    },
    /// Stop mining the given height
    CancelMining {
        /// Directory block height
        height: i32,
    },
    /// The interval is over; grade what was mined
    IntervalClosed {
        /// Directory block height
        height: i32,
    },
}

/// One wire message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Command code, see [`commands`]
    pub command: u32,
    /// Payload, interpreted according to `command`
    pub data: Vec<u8>,
}

impl Message {
    /// Create a message
    #[must_use]
    pub fn new(command: u32, data: Vec<u8>) -> Self {
        Self { command, data }
    }

    /// Wrap a coordinator event
    ///
    /// # Errors
    /// Returns error if the event cannot be encoded
    pub fn forward_event(event: &CoordinatorEvent) -> Result<Self, NetworkError> {
        let data = bincode::serialize(event).map_err(|e| NetworkError::Encode(e.to_string()))?;
        Ok(Self::new(commands::EVENT_FORWARD, data))
    }

    /// Unwrap a forwarded coordinator event
    ///
    /// # Errors
    /// Returns error if this is not an event message or the payload is malformed
    pub fn decode_event(&self) -> Result<CoordinatorEvent, NetworkError> {
        if self.command != commands::EVENT_FORWARD {
            return Err(NetworkError::UnexpectedCommand(self.command));
        }
        bincode::deserialize(&self.data).map_err(|e| NetworkError::Decode(e.to_string()))
    }
}

/// Connection event callbacks.
///
/// Callbacks for one connection run one at a time, in wire order, on that
/// connection's read loop. Different connections call in concurrently.
/// Every method defaults to doing nothing.
pub trait ConnectionHandler: Send + Sync {
    /// A connection was established
    fn on_connect(&self, _conn: &Connection) {}

    /// A message arrived
    fn on_message(&self, _conn: &Connection, _msg: Message) {}

    /// The connection ended; `None` means the peer closed cleanly
    fn on_close(&self, _conn: &Connection, _err: Option<NetworkError>) {}
}

/// Handler that ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Connect,
        Message(Message),
        Close(bool),
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Seen>,
    }

    impl ConnectionHandler for Recorder {
        fn on_connect(&self, _conn: &Connection) {
            let _ = self.tx.send(Seen::Connect);
        }

        fn on_message(&self, _conn: &Connection, msg: Message) {
            let _ = self.tx.send(Seen::Message(msg));
        }

        fn on_close(&self, _conn: &Connection, err: Option<NetworkError>) {
            let _ = self.tx.send(Seen::Close(err.is_some()));
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("handler dropped")
    }

    async fn start_server(handler: Arc<dyn ConnectionHandler>) -> (Arc<Server>, std::net::SocketAddr) {
        let mut server = Server::bind("127.0.0.1:0").await.unwrap();
        server.set_handler(handler);
        let addr = server.local_addr().unwrap();
        let server = Arc::new(server);
        let serving = Arc::clone(&server);
        tokio::spawn(async move { serving.serve().await });
        (server, addr)
    }

    #[test]
    fn test_event_roundtrip() {
        let event = CoordinatorEvent::IntervalStarted {
            height: 2000,
            minute: 1,
        };
        let msg = Message::forward_event(&event).unwrap();
        assert_eq!(msg.command, commands::EVENT_FORWARD);
        assert_eq!(msg.decode_event().unwrap(), event);
    }

    #[test]
    fn test_decode_event_wrong_command() {
        assert!(matches!(
            Message::new(9, Vec::new()).decode_event(),
            Err(NetworkError::UnexpectedCommand(9))
        ));
        assert!(matches!(
            Message::new(commands::EVENT_FORWARD, vec![0xff; 2]).decode_event(),
            Err(NetworkError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_client_to_server() {
        let (handler, mut rx) = recorder();
        let (_server, addr) = start_server(handler).await;

        let (conn, _reader) = Client::connect(addr, Arc::new(NoopHandler)).await.unwrap();
        let msg = Message::new(42, (0..=255).collect());
        conn.send(&msg).await.unwrap();

        assert_eq!(next(&mut rx).await, Seen::Connect);
        assert_eq!(next(&mut rx).await, Seen::Message(msg));

        conn.close().await;
        assert_eq!(next(&mut rx).await, Seen::Close(false));
    }

    #[tokio::test]
    async fn test_server_to_client() {
        let (server, addr) = start_server(Arc::new(NoopHandler)).await;

        let (handler, mut rx) = recorder();
        let (_conn, _reader) = Client::connect(addr, handler).await.unwrap();
        assert_eq!(next(&mut rx).await, Seen::Connect);

        let registry = server.connections();
        timeout(Duration::from_secs(5), async {
            while registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let event = CoordinatorEvent::CancelMining { height: 9 };
        let msg = Message::forward_event(&event).unwrap();
        assert_eq!(server.broadcast(&msg).await, 1);

        match next(&mut rx).await {
            Seen::Message(received) => assert_eq!(received.decode_event().unwrap(), event),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_closes_once() {
        let (handler, mut rx) = recorder();
        let (server, addr) = start_server(handler).await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"this is not a frame at all").await.unwrap();

        assert_eq!(next(&mut rx).await, Seen::Connect);
        assert_eq!(next(&mut rx).await, Seen::Close(true));

        // Nothing more from that connection, even if the peer keeps writing
        let _ = raw.write_all(&encode_frame(&Message::new(1, vec![1])).unwrap()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        timeout(Duration::from_secs(5), async {
            while !server.connections().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_clean_close_after_messages() {
        let (handler, mut rx) = recorder();
        let (_server, addr) = start_server(handler).await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let first = Message::new(1, b"a".to_vec());
        let second = Message::new(2, b"b".to_vec());
        write_message(&mut raw, &first).await.unwrap();
        write_message(&mut raw, &second).await.unwrap();
        raw.shutdown().await.unwrap();

        assert_eq!(next(&mut rx).await, Seen::Connect);
        assert_eq!(next(&mut rx).await, Seen::Message(first));
        assert_eq!(next(&mut rx).await, Seen::Message(second));
        assert_eq!(next(&mut rx).await, Seen::Close(false));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (_server, addr) = start_server(Arc::new(NoopHandler)).await;
        let (conn, _reader) = Client::connect(addr, Arc::new(NoopHandler)).await.unwrap();
        conn.close().await;
        assert!(matches!(
            conn.send(&Message::new(1, Vec::new())).await,
            Err(NetworkError::Closed)
        ));
    }
}
