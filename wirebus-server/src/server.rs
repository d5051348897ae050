//! TCP server implementation.

use crate::config::Config;
use crate::connection::{handle_connection, ConnectionSettings};
use crate::error::ServerError;
use crate::registry::ClientRegistry;
use crate::router::CommandRouter;
use crate::service::ServiceRegistry;
use crate::stream::MaybeTlsStream;
use serde_json::Value;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use wirebus_codec::CodecWorker;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection timings.
    pub connection: ConnectionSettings,
    /// TLS acceptor (if TLS is enabled).
    pub tls_acceptor: Option<Arc<TlsAcceptor>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("connection", &self.connection)
            .field("tls_enabled", &self.tls_acceptor.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", wirebus_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            max_connections: 1000,
            connection: ConnectionSettings::default(),
            tls_acceptor: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the TLS acceptor.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(Arc::new(acceptor));
        self
    }

    /// Returns whether TLS is enabled.
    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }

    /// Builds a server config from file configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            connection: ConnectionSettings {
                handshake_timeout: config.network.handshake_timeout(),
                keepalive: config.network.keepalive(),
                accumulator_ttl: config.protocol.accumulator_ttl(),
                ..ConnectionSettings::default()
            },
            tls_acceptor: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub errors_total: AtomicU64,
}

/// The wirebus server.
pub struct Server {
    config: ServerConfig,
    router: Arc<CommandRouter>,
    registry: Arc<ClientRegistry>,
    codec: CodecWorker,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server over the given service registry.
    pub fn new(config: ServerConfig, services: ServiceRegistry) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(ClientRegistry::new());
        let router = Arc::new(CommandRouter::new(Arc::new(services), registry.clone()));
        Self {
            config,
            router,
            registry,
            codec: CodecWorker::spawn(),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// The connected-client registry (for server-side emit/broadcast).
    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    /// Server statistics.
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Emits an event to every listener of `event_name` whose info
    /// passes `info_filter`. Returns the number of messages queued.
    pub fn emit<F>(&self, event_name: &str, info_filter: F, data: &Value) -> usize
    where
        F: Fn(&Value) -> bool,
    {
        let target_keys: Vec<String> = self
            .registry
            .listener_infos_for(event_name)
            .into_iter()
            .filter(|l| info_filter(&l.info))
            .map(|l| l.key)
            .collect();
        self.registry.emit_to_keys(&target_keys, data)
    }

    /// Pushes a reload notice to every connected client.
    pub fn broadcast_reload(
        &self,
        client_name: Option<String>,
        changed_file_set: BTreeSet<String>,
    ) -> usize {
        self.registry.broadcast_reload(client_name, changed_file_set)
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);

        let tls_mode = if self.config.tls_enabled() {
            "TLS"
        } else {
            "plain"
        };
        tracing::info!(
            "server listening on {} ({})",
            listener.local_addr()?,
            tls_mode
        );

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let tls_acceptor = self.config.tls_acceptor.clone();
                            let router = self.router.clone();
                            let registry = self.registry.clone();
                            let codec = self.codec.clone();
                            let settings = self.config.connection.clone();
                            let stats = self.stats.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let stream = match Self::maybe_tls_accept(
                                    tcp_stream,
                                    tls_acceptor.as_deref(),
                                    addr,
                                )
                                .await
                                {
                                    Ok(s) => s,
                                    Err(e) => {
                                        tracing::warn!("[{}] TLS handshake failed: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                        return;
                                    }
                                };

                                let result = handle_connection(
                                    stream,
                                    addr,
                                    router,
                                    registry,
                                    codec,
                                    settings,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::debug!("connection {} ended: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn maybe_tls_accept(
        tcp_stream: TcpStream,
        acceptor: Option<&TlsAcceptor>,
        addr: SocketAddr,
    ) -> Result<MaybeTlsStream, ServerError> {
        tcp_stream.set_nodelay(true).ok();
        match acceptor {
            Some(acceptor) => {
                tracing::debug!("[{}] performing TLS handshake", addr);
                let tls_stream = acceptor
                    .accept(tcp_stream)
                    .await
                    .map_err(|e| ServerError::TlsHandshake(e.to_string()))?;
                Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
            }
            None => Ok(MaybeTlsStream::Plain(tcp_stream)),
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
