//! Native TCP server for RCSP
//!
//! Every accepted connection is registered before its task is spawned and removed when
//! that task ends, whatever the cause. `close` force-terminates everything in the
//! registry; `shutdown` stops accepting and waits for the registry to drain.
//!
//! The registry mutex and the store's lock are never held at the same time.

pub(crate) mod backoff;
mod connection;
mod handler;
mod tls;

pub use tls::load_acceptor;

use crate::metrics::Metrics;
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::server::backoff::{
    ACCEPT_RETRY_DELAY_MAX, ACCEPT_RETRY_DELAY_MIN, AcceptError, Backoff,
    SHUTDOWN_POLL_INTERVAL_MAX, SHUTDOWN_POLL_INTERVAL_MIN, classify_accept_error,
};
use crate::storage::Store;
use crate::{RcsError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Native RCSP server
pub struct Server {
    pub(crate) store: Arc<Store>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) max_message_size: usize,
    in_shutdown: AtomicBool,
    registry: Mutex<Registry>,
}

/// Listener handles and live connections
#[derive(Default)]
struct Registry {
    listeners: Vec<CancellationToken>,
    conns: HashMap<u64, CancellationToken>,
    next_id: u64,
}

impl Server {
    /// Create a new server on top of a shared store
    pub fn new(store: Arc<Store>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            in_shutdown: AtomicBool::new(false),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Set the largest message accepted in a single read
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size.max(1);
        self
    }

    /// Bind `addr` and serve plain TCP connections until the listener is closed
    pub async fn listen_and_serve(self: &Arc<Self>, addr: &str) -> Result<()> {
        if self.is_shutting_down() {
            info!("listen_and_serve aborted: server is shutting down");
            return Ok(());
        }

        let listener = TcpListener::bind(addr).await?;
        info!("Native server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Load the certificate pair, bind `addr` and serve TLS connections
    ///
    /// Nothing is bound when the certificate or key cannot be loaded.
    pub async fn listen_and_serve_tls(
        self: &Arc<Self>,
        addr: &str,
        cert_file: &Path,
        key_file: &Path,
    ) -> Result<()> {
        if self.is_shutting_down() {
            info!("listen_and_serve_tls aborted: server is shutting down");
            return Ok(());
        }

        let acceptor = tls::load_acceptor(cert_file, key_file).inspect_err(|e| {
            error!("Failed to load TLS certificate: {}", e);
        })?;
        let listener = TcpListener::bind(addr).await?;
        info!("Native TLS server listening on {}", listener.local_addr()?);
        self.serve_tls(listener, acceptor).await
    }

    /// Serve plain connections on an already bound listener
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        self.accept_loop(listener, None).await
    }

    /// Serve TLS connections on an already bound listener
    pub async fn serve_tls(
        self: &Arc<Self>,
        listener: TcpListener,
        acceptor: TlsAcceptor,
    ) -> Result<()> {
        self.accept_loop(listener, Some(acceptor)).await
    }

    /// Force-close the listener and every registered connection
    ///
    /// Safe to call repeatedly. For a graceful stop use [`Server::shutdown`].
    pub fn close(&self) {
        self.in_shutdown.store(true, Ordering::SeqCst);
        self.close_listeners();

        let mut registry = self.registry.lock();
        let forced = registry.conns.len();
        for (_, conn) in registry.conns.drain() {
            conn.cancel();
        }
        drop(registry);

        info!(forced, "Native server has been closed");
    }

    /// Stop accepting and wait for open connections to finish
    ///
    /// Polls the registry with exponential backoff until it is empty or `deadline` is
    /// cancelled. The listener stays closed either way, so a caller whose deadline
    /// fires usually follows up with [`Server::close`].
    pub async fn shutdown(&self, deadline: &CancellationToken) -> Result<()> {
        self.in_shutdown.store(true, Ordering::SeqCst);
        self.close_listeners();

        let mut backoff = Backoff::new(SHUTDOWN_POLL_INTERVAL_MIN, SHUTDOWN_POLL_INTERVAL_MAX);
        loop {
            let remaining = self.connection_count();
            if remaining == 0 {
                info!("Native server has been shut down");
                return Ok(());
            }

            tokio::select! {
                _ = deadline.cancelled() => {
                    warn!(remaining, "Shutdown deadline reached with open connections");
                    return Err(RcsError::ShutdownInterrupted { remaining });
                }
                _ = tokio::time::sleep(backoff.next_interval()) => {}
            }
        }
    }

    /// Number of registered connections
    pub fn connection_count(&self) -> usize {
        self.registry.lock().conns.len()
    }

    /// Returns true once `close` or `shutdown` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.in_shutdown.load(Ordering::SeqCst)
    }

    fn close_listeners(&self) {
        let mut registry = self.registry.lock();
        for listener in registry.listeners.drain(..) {
            listener.cancel();
        }
    }

    async fn accept_loop(
        self: &Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    ) -> Result<()> {
        let closed = CancellationToken::new();
        {
            let mut registry = self.registry.lock();
            if self.is_shutting_down() {
                return Ok(());
            }
            registry.listeners.push(closed.clone());
        }

        let mut retry = Backoff::new(ACCEPT_RETRY_DELAY_MIN, ACCEPT_RETRY_DELAY_MAX);
        let result = loop {
            let accepted = tokio::select! {
                _ = closed.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            let e = match accepted {
                Ok((stream, peer)) => {
                    retry.reset();
                    self.spawn_connection(stream, peer, tls.clone());
                    continue;
                }
                Err(_) if self.is_shutting_down() => break Ok(()),
                Err(e) => e,
            };

            match classify_accept_error(&e) {
                AcceptError::Connection => error!("Failed to accept connection: {}", e),
                AcceptError::Exhausted => {
                    let delay = retry.next_interval();
                    error!("Failed to accept connection: {}; retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = closed.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                AcceptError::Fatal => {
                    error!("Listener failed: {}", e);
                    break Err(e.into());
                }
            }
        };

        info!("Native server stopped accepting connections");
        result
    }

    fn spawn_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        tls: Option<TlsAcceptor>,
    ) {
        let Some(registration) = self.register() else {
            debug!(peer = %peer, "Dropping connection accepted during shutdown");
            return;
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = registration.cancel.clone();
            let result = match tls {
                None => connection::handle(&server, stream, peer, &cancel).await,
                Some(acceptor) => tokio::select! {
                    _ = cancel.cancelled() => Ok(()),
                    handshake = acceptor.accept(stream) => match handshake {
                        Ok(stream) => connection::handle(&server, stream, peer, &cancel).await,
                        Err(e) => {
                            debug!(peer = %peer, "TLS handshake failed: {}", e);
                            Ok(())
                        }
                    },
                },
            };

            if let Err(e) = result {
                debug!(peer = %peer, "Connection error: {}", e);
            }
            drop(registration);
        });
    }

    fn register(self: &Arc<Self>) -> Option<Registration> {
        let cancel = CancellationToken::new();
        let id = {
            let mut registry = self.registry.lock();
            if self.is_shutting_down() {
                return None;
            }
            let id = registry.next_id;
            registry.next_id += 1;
            registry.conns.insert(id, cancel.clone());
            id
        };

        self.metrics.total_connections.inc();
        self.metrics.active_connections.inc();
        Some(Registration {
            server: Arc::clone(self),
            id,
            cancel,
        })
    }
}

/// Registry entry for one connection task; unregisters on drop
struct Registration {
    server: Arc<Server>,
    id: u64,
    cancel: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.server.registry.lock().conns.remove(&self.id);
        self.server.metrics.active_connections.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_server() -> Arc<Server> {
        Arc::new(Server::new(
            Arc::new(Store::new()),
            Arc::new(Metrics::new()),
        ))
    }

    #[test]
    fn test_registration_lifecycle() {
        let server = test_server();
        let a = server.register().unwrap();
        let b = server.register().unwrap();
        assert_eq!(server.connection_count(), 2);
        assert_eq!(server.metrics.active_connections.get(), 2);

        drop(a);
        assert_eq!(server.connection_count(), 1);
        drop(b);
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.metrics.total_connections.get(), 2);
    }

    #[test]
    fn test_close_cancels_registered_connections() {
        let server = test_server();
        let registration = server.register().unwrap();

        server.close();
        server.close();

        assert!(registration.cancel.is_cancelled());
        assert_eq!(server.connection_count(), 0);
        assert!(server.is_shutting_down());
        assert!(server.register().is_none());

        // Late drop of an already-removed entry is harmless
        drop(registration);
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_without_connections_returns_immediately() {
        let server = test_server();
        let deadline = CancellationToken::new();
        server.shutdown(&deadline).await.unwrap();
        assert!(server.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_interrupted_by_deadline() {
        let server = test_server();
        let _registration = server.register().unwrap();

        let deadline = CancellationToken::new();
        let trigger = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = server.shutdown(&deadline).await.unwrap_err();
        assert!(matches!(err, RcsError::ShutdownInterrupted { remaining: 1 }));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_drain() {
        let server = test_server();
        let registration = server.register().unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(registration);
        });

        let deadline = CancellationToken::new();
        server.shutdown(&deadline).await.unwrap();
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_after_shutdown_is_noop() {
        let server = test_server();
        server.close();
        server.listen_and_serve("127.0.0.1:0").await.unwrap();
    }
}
