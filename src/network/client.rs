//! Dialing side.

use std::sync::Arc;

use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::info;

use super::connection::run_read_loop;
use super::{Connection, ConnectionHandler, NetworkError};

/// Connects to a server
#[derive(Clone, Copy, Debug, Default)]
pub struct Client;

impl Client {
    /// Dial `addr` over plain TCP. Returns the connection and its read loop task.
    ///
    /// # Errors
    /// Returns error if the connection cannot be established
    pub async fn connect(
        addr: impl ToSocketAddrs,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(Connection, JoinHandle<()>), NetworkError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (conn, reader) = Connection::split(stream, peer);
        info!(conn = conn.id(), peer = %peer, "Connected");
        let task = tokio::spawn(run_read_loop(conn.clone(), reader, handler));
        Ok((conn, task))
    }

    /// Dial `addr` and perform a TLS handshake for `domain`
    ///
    /// # Errors
    /// Returns error if the connection or the handshake fails
    pub async fn connect_tls(
        addr: impl ToSocketAddrs,
        domain: ServerName<'static>,
        connector: TlsConnector,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(Connection, JoinHandle<()>), NetworkError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let tls = connector
            .connect(domain, stream)
            .await
            .map_err(|e| NetworkError::Tls(e.to_string()))?;

        let (conn, reader) = Connection::split(tls, peer);
        info!(conn = conn.id(), peer = %peer, tls = true, "Connected");
        let task = tokio::spawn(run_read_loop(conn.clone(), reader, handler));
        Ok((conn, task))
    }
}
