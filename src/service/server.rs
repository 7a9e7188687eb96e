//! Server supervisor.
//!
//! Binds every configured binary listener plus the admin listener, wires
//! the shared collaborators into each accepted connection's task, and
//! supervises shutdown. A failed bind is fatal: the server never silently
//! serves on fewer ports than configured.
//!
//! ## Lifecycle
//! ```text
//! Server::builder() -> build() -> bind() -> run() / run_with_shutdown()
//! ```
//! `bind()` resolves port 0 to real addresses before traffic starts, which
//! keeps tests free of fixed ports.

use crate::config::MuxConfig;
use crate::core::ban::{BanStore, MemoryBanStore};
use crate::core::registry::ConnectionRegistry;
use crate::error::{MuxError, Result};
use crate::protocol::handler::PacketHandler;
use crate::service::admin::handle_admin_conn;
use crate::service::connection::{handle_client, ServerContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Connection-mux server, assembled via [`Server::builder`].
pub struct Server {
    config: MuxConfig,
    registry: Arc<ConnectionRegistry>,
    ban_store: Arc<dyn BanStore>,
    packet_handler: Arc<dyn PacketHandler>,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind all configured listeners.
    ///
    /// Fails with [`MuxError::ListenerBind`] on the first port that cannot
    /// be bound; no traffic is served in that case.
    pub async fn bind(self) -> Result<BoundServer> {
        self.config.validate_strict()?;

        let host = &self.config.listener.host;
        let mut binary_listeners = Vec::with_capacity(self.config.listener.ports.len());
        let mut binary_addrs = Vec::with_capacity(self.config.listener.ports.len());
        for port in &self.config.listener.ports {
            let listener = bind_one(host, *port).await?;
            binary_addrs.push(listener.local_addr()?);
            binary_listeners.push(listener);
        }

        let admin_listener = bind_one(host, self.config.listener.admin_port).await?;
        let admin_addr = admin_listener.local_addr()?;

        for addr in &binary_addrs {
            info!(address = %addr, "Listening for binary/HTTP traffic");
        }
        info!(address = %admin_addr, "Admin listener ready");

        let ctx = Arc::new(ServerContext {
            registry: self.registry.clone(),
            ban_store: self.ban_store.clone(),
            ban_policy: self.config.ban.policy,
            packet_handler: self.packet_handler,
            codec_mode: self.config.codec.mode,
            max_payload_size: self.config.codec.max_payload_size,
            upstream_address: self.config.relay.upstream_address.clone(),
        });

        Ok(BoundServer {
            binary_listeners,
            binary_addrs,
            admin_listener,
            admin_addr,
            registry: self.registry,
            ban_store: self.ban_store,
            shutdown_timeout: self.config.listener.shutdown_timeout,
            ctx,
        })
    }
}

async fn bind_one(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|e| MuxError::ListenerBind {
            addr,
            reason: e.to_string(),
        })
}

/// Builder for constructing a Server
pub struct ServerBuilder {
    config: MuxConfig,
    ban_store: Option<Arc<dyn BanStore>>,
    packet_handler: Option<Arc<dyn PacketHandler>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a new server builder with default settings
    pub fn new() -> Self {
        Self {
            config: MuxConfig::default(),
            ban_store: None,
            packet_handler: None,
        }
    }

    /// Set configuration
    pub fn config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the ban store adapter
    pub fn ban_store(mut self, ban_store: Arc<dyn BanStore>) -> Self {
        self.ban_store = Some(ban_store);
        self
    }

    /// Set the application packet handler
    pub fn packet_handler(mut self, handler: Arc<dyn PacketHandler>) -> Self {
        self.packet_handler = Some(handler);
        self
    }

    /// Build the server
    ///
    /// Panics if the packet handler is not set
    pub fn build(self) -> Server {
        Server {
            config: self.config,
            registry: Arc::new(ConnectionRegistry::new()),
            ban_store: self
                .ban_store
                .unwrap_or_else(|| Arc::new(MemoryBanStore::new())),
            packet_handler: self.packet_handler.expect("packet handler is required"),
        }
    }
}

/// A server whose listeners are bound but not yet serving.
pub struct BoundServer {
    binary_listeners: Vec<TcpListener>,
    binary_addrs: Vec<SocketAddr>,
    admin_listener: TcpListener,
    admin_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    ban_store: Arc<dyn BanStore>,
    shutdown_timeout: Duration,
    ctx: Arc<ServerContext>,
}

impl BoundServer {
    /// Bound addresses of the binary listeners, in configuration order.
    pub fn binary_addrs(&self) -> &[SocketAddr] {
        &self.binary_addrs
    }

    /// Bound address of the admin listener.
    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    /// Shared registry handle, for inspection outside the admin protocol.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Shared ban store handle.
    pub fn ban_store(&self) -> Arc<dyn BanStore> {
        self.ban_store.clone()
    }

    /// Serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        // Create internal shutdown channel
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        // Set up ctrl-c handler that sends to our internal shutdown channel
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Serve until a message (or close) on the provided shutdown channel.
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);

        for listener in self.binary_listeners {
            tokio::spawn(accept_loop(listener, self.ctx.clone(), stop_rx.clone()));
        }
        tokio::spawn(admin_accept_loop(
            self.admin_listener,
            self.registry.clone(),
            self.ban_store.clone(),
            stop_rx,
        ));

        // Block until shutdown is requested (message or all senders dropped)
        let _ = shutdown_rx.recv().await;
        info!("Shutting down server. Waiting for connections to close...");
        let _ = stop_tx.send(true);

        // Wait for active connections to close (with timeout)
        let timeout = tokio::time::sleep(self.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                _ = &mut timeout => {
                    warn!("Shutdown timeout reached, forcing exit");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    let connections = self.registry.len().unwrap_or(0);
                    info!(connections = %connections, "Waiting for connections to close");
                    if connections == 0 {
                        info!("All connections closed, shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_client(ctx.clone(), stream, peer));
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

async fn admin_accept_loop(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    ban_store: Arc<dyn BanStore>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_admin_conn(
                            stream,
                            registry.clone(),
                            ban_store.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting admin connection");
                    }
                }
            }
        }
    }
}
