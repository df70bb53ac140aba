//! Listener abstractions for accepting connections.
//!
//! The server accepts through the [`Listener`] trait so the transport can
//! change without touching the HTTP layer. Only plain TCP is provided.

mod tcp;

pub use tcp::{TcpConnection, TcpListener};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// A connection accepted by a listener.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Get the remote address of the connection.
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Trait for listening and accepting connections.
pub trait Listener: Send + Sync {
    /// The connection type produced by this listener.
    type Conn: Connection;

    /// Accept a new connection.
    fn accept(&self) -> Pin<Box<dyn Future<Output = io::Result<Self::Conn>> + Send + '_>>;

    /// Get the local address this listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Get the listener name for logging.
    fn name(&self) -> &'static str;
}
