//! Accepting side.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::connection::run_read_loop;
use super::{Connection, ConnectionHandler, Message, NetworkError, NoopHandler};

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Default limit on a TLS handshake before the socket is dropped
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Live connections of a server
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: Mutex<HashMap<u64, Connection>>,
}

impl ConnectionRegistry {
    fn insert(&self, conn: Connection) {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn.id(), conn);
    }

    fn remove(&self, id: u64) {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Current connections
    #[must_use]
    pub fn snapshot(&self) -> Vec<Connection> {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of live connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no connection is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `msg` to every live connection; returns how many accepted it
    pub async fn broadcast(&self, msg: &Message) -> usize {
        let mut sent = 0;
        for conn in self.snapshot() {
            match conn.send(msg).await {
                Ok(()) => sent += 1,
                Err(e) => debug!(conn = conn.id(), error = %e, "Broadcast skipped connection"),
            }
        }
        sent
    }
}

/// Listening server
pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    handshake_timeout: Duration,
    handler: Arc<dyn ConnectionHandler>,
    connections: Arc<ConnectionRegistry>,
}

impl Server {
    /// Bind a plaintext listener
    ///
    /// # Errors
    /// Returns error if the address cannot be bound
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, NetworkError> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            tls: None,
            handshake_timeout: TLS_HANDSHAKE_TIMEOUT,
            handler: Arc::new(NoopHandler),
            connections: Arc::new(ConnectionRegistry::default()),
        })
    }

    /// Bind a listener that performs a TLS handshake on every connection
    ///
    /// # Errors
    /// Returns error if the address cannot be bound
    pub async fn bind_tls(
        addr: impl ToSocketAddrs,
        acceptor: TlsAcceptor,
    ) -> Result<Self, NetworkError> {
        let mut server = Self::bind(addr).await?;
        server.tls = Some(acceptor);
        Ok(server)
    }

    /// Limit how long a peer may take to finish the TLS handshake
    pub fn set_handshake_timeout(&mut self, limit: Duration) {
        self.handshake_timeout = limit;
    }

    /// Install the callbacks used for connections accepted from now on
    pub fn set_handler(&mut self, handler: Arc<dyn ConnectionHandler>) {
        self.handler = handler;
    }

    /// Bound address
    ///
    /// # Errors
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared view of live connections
    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.connections)
    }

    /// Send `msg` to every live connection
    pub async fn broadcast(&self, msg: &Message) -> usize {
        self.connections.broadcast(msg).await
    }

    /// Accept connections forever
    pub async fn serve(&self) {
        info!(
            addr = ?self.listener.local_addr().ok(),
            tls = self.tls.is_some(),
            "Server listening"
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
            }

            let handler = Arc::clone(&self.handler);
            let registry = Arc::clone(&self.connections);
            match &self.tls {
                None => spawn_connection(stream, peer, handler, registry),
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    let limit = self.handshake_timeout;
                    tokio::spawn(async move {
                        match handshake(acceptor.accept(stream), limit).await {
                            Ok(tls) => spawn_connection(tls, peer, handler, registry),
                            Err(e) => warn!(peer = %peer, error = %e, "TLS handshake failed"),
                        }
                    });
                }
            }
        }
    }
}

/// Await a handshake, giving up after `limit`
async fn handshake<F, S>(accept: F, limit: Duration) -> Result<S, NetworkError>
where
    F: Future<Output = io::Result<S>>,
{
    match tokio::time::timeout(limit, accept).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(NetworkError::Tls(e.to_string())),
        Err(_) => Err(NetworkError::Tls(format!(
            "handshake timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

fn spawn_connection<S>(
    stream: S,
    peer: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    registry: Arc<ConnectionRegistry>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (conn, reader) = Connection::split(stream, peer);
    registry.insert(conn.clone());
    debug!(conn = conn.id(), peer = %peer, "Accepted connection");

    tokio::spawn(async move {
        let id = conn.id();
        run_read_loop(conn, reader, handler).await;
        registry.remove(id);
    });
}
