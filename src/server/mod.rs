//! HTTP server: accept loop, connection draining and request dispatch.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let addr = config.server.listen_addr;
//! let mut app = App::new(config);
//! app.get("/hello", hello)?;
//!
//! let server = Server::bind(app, addr).await?;
//! let shutdown = server.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//! server.run().await?;
//! ```
//!
//! # Graceful Shutdown
//!
//! [`ShutdownHandle::shutdown`] stops the accept loop and asks every open
//! connection to finish its in-flight requests. [`Server::run`] then waits
//! up to `SHUTDOWN_TIMEOUT` for connections to drain.

mod app;
mod connection;
mod routing;

pub use app::{App, RouteGroup};
pub use connection::dispatch;
pub use routing::{join_path, Route, RouteMatch, RouteTable};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::listener::{Listener, TcpListener};

/// Errors from binding or running the server.
#[derive(Debug)]
pub enum ServerError {
    Bind { addr: SocketAddr, source: io::Error },
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            ServerError::Io(e) => write!(f, "server I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Io(e) => Some(e),
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// Stops a running [`Server`]. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Trigger graceful shutdown. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }
}

/// A bound HTTP server.
pub struct Server {
    app: Arc<App>,
    listener: TcpListener,
    active_connections: Arc<AtomicUsize>,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Bind `addr` and prepare to serve `app`. Port 0 picks a free port.
    pub async fn bind(app: App, addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            app: Arc::new(app),
            listener,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown: ShutdownHandle {
                shutdown_tx: Arc::new(shutdown_tx),
                shutdown_initiated: Arc::new(AtomicBool::new(false)),
            },
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Get current active connections count.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Accept connections until shutdown, then drain.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(
            "Server listening on http://{} ({})",
            addr,
            self.listener.name()
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let conn = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Accept error: {}", e);
                            continue;
                        }
                    };

                    let app = Arc::clone(&self.app);
                    let active = Arc::clone(&self.active_connections);
                    let conn_shutdown = self.shutdown_rx.clone();
                    tokio::spawn(async move {
                        connection::serve_connection(app, conn, active, conn_shutdown).await;
                    });
                }
                _ = shutdown_rx.changed() => {
                    debug!("Received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        let timeout = self.app.config().server.shutdown_timeout;
        if self.wait_for_drain(timeout).await {
            info!("All connections drained");
        }
        Ok(())
    }

    /// Wait for all active connections to drain.
    /// Returns true if drained successfully, false if timeout was reached.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        loop {
            let active = self.active_connections.load(Ordering::Relaxed);
            if active == 0 {
                return true;
            }

            if start.elapsed() >= timeout {
                warn!("Drain timeout reached with {} active connections", active);
                return false;
            }

            debug!("Waiting for {} connections to drain...", active);
            tokio::time::sleep(check_interval).await;
        }
    }
}
