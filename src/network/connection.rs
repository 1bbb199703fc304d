//! One framed connection and its read loop.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{read_message, write_message, ConnectionHandler, Message, NetworkError};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Inner {
    id: u64,
    peer: SocketAddr,
    writer: Mutex<Option<BoxWriter>>,
}

/// Handle to one live connection. Clones share the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Split `stream` into a writable handle and the read half for the loop
    pub(crate) fn split<S>(stream: S, peer: SocketAddr) -> (Self, ReadHalf<S>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let conn = Self {
            inner: Arc::new(Inner {
                id: rand::random(),
                peer,
                writer: Mutex::new(Some(Box::new(writer))),
            }),
        };
        (conn, reader)
    }

    /// Random identifier for logs; not persistent, not for security
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote address
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Write one message. Safe to call from any task.
    ///
    /// # Errors
    /// Returns error if the connection is closed or the write fails
    pub async fn send(&self, msg: &Message) -> Result<(), NetworkError> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(NetworkError::Closed)?;
        write_message(writer, msg).await
    }

    /// Shut down the write side. Further sends fail with [`NetworkError::Closed`].
    pub async fn close(&self) {
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(conn = self.id(), error = %e, "Shutdown failed");
            }
        }
    }

    /// Whether [`close`](Self::close) has run
    pub async fn is_closed(&self) -> bool {
        self.inner.writer.lock().await.is_none()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &format_args!("{:016x}", self.inner.id))
            .field("peer", &self.inner.peer)
            .finish_non_exhaustive()
    }
}

/// Drive `conn` until the peer closes or a frame fails to decode.
///
/// Calls `on_connect` once, `on_message` per frame in order, then closes the
/// socket and calls `on_close` exactly once.
pub(crate) async fn run_read_loop<R>(
    conn: Connection,
    mut reader: R,
    handler: Arc<dyn ConnectionHandler>,
) where
    R: AsyncRead + Unpin,
{
    handler.on_connect(&conn);

    let reason = loop {
        match read_message(&mut reader).await {
            Ok(Some(msg)) => handler.on_message(&conn, msg),
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };

    drop(reader);
    conn.close().await;

    match &reason {
        None => debug!(conn = conn.id(), peer = %conn.peer_addr(), "Connection closed"),
        Some(e) => warn!(conn = conn.id(), peer = %conn.peer_addr(), error = %e, "Connection dropped"),
    }
    handler.on_close(&conn, reason);
}
