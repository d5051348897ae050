//! Connection management.
//!
//! The [`ConnectionManager`] owns the transport handle and the
//! connection state machine. Calls, events and control messages all
//! share its one framed stream; the correlator and event bus hang off
//! it so transport loss can reject pending calls and stop event
//! delivery in one place.

use crate::correlator::Correlator;
use crate::error::ClientError;
use crate::events::EventBus;
use crate::reconnect::{DefaultReconnectStrategy, ReconnectStrategy};
use crate::stream::ClientStream;
use crate::tls::{create_insecure_tls_connector, create_tls_connector};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;
use wirebus_codec::CodecWorker;
use wirebus_protocol::{
    Decoder, Frame, Message, SpecialCommand, SplitAccumulator,
};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// How long `send` waits for the connection to come up before failing
/// with `NotConnected` (5000 ms). Lets brief reconnect windows self-heal
/// without callers re-implementing a retry loop.
pub const DEFAULT_SEND_WAIT: Duration = Duration::from_millis(5000);

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, system roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the host part of the address).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self.enabled = true;
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self.enabled = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Client name, sent with every request and matched against
    /// targeted reload pushes.
    pub client_name: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Per-call timeout.
    pub request_timeout: Duration,
    /// Bounded wait for the connected state inside `send`.
    pub send_wait: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
    /// Reconnect policy; `None` disables automatic reconnection.
    pub reconnect: Option<Arc<dyn ReconnectStrategy>>,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr, client_name: impl Into<String>) -> Self {
        Self {
            addr,
            client_name: client_name.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            send_wait: DEFAULT_SEND_WAIT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tls: None,
            reconnect: Some(Arc::new(DefaultReconnectStrategy::default())),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_send_wait(mut self, wait: Duration) -> Self {
        self.send_wait = wait;
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    pub fn with_reconnect(mut self, strategy: Arc<dyn ReconnectStrategy>) -> Self {
        self.reconnect = Some(strategy);
        self
    }

    pub fn without_reconnect(mut self) -> Self {
        self.reconnect = None;
        self
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Progress of a split transfer, surfaced as optional telemetry.
#[derive(Debug, Clone)]
pub enum TransferProgress {
    /// An outgoing split request, as acknowledged by the server.
    Request {
        uuid: Uuid,
        full_size: u64,
        completed_size: u64,
    },
    /// An incoming split response being reassembled.
    Response {
        req_uuid: Uuid,
        full_size: u64,
        completed_size: u64,
    },
}

/// A `client-reload` push addressed to this client.
#[derive(Debug, Clone)]
pub struct ReloadNotice {
    pub client_name: Option<String>,
    pub changed_file_set: BTreeSet<String>,
}

/// Capacity for the progress broadcast channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Capacity for the reload broadcast channel.
const RELOAD_CHANNEL_CAPACITY: usize = 16;

/// A managed connection to a wirebus server.
pub struct ConnectionManager {
    /// Self-handle for tasks the manager spawns (read loop, reconnect).
    weak: Weak<ConnectionManager>,
    config: ConnectionConfig,
    /// Stable identifier this client answers `client-get-id` with.
    client_id: Uuid,
    codec: CodecWorker,
    correlator: Correlator,
    events: EventBus,
    /// Write half of the stream; `None` while disconnected.
    writer: Mutex<Option<WriteHalf<ClientStream>>>,
    /// Background read task for the current stream.
    read_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Published connection state.
    state_tx: watch::Sender<ConnectionState>,
    /// Serializes connect attempts; a held lock means one is in flight.
    connect_gate: Mutex<()>,
    progress_tx: broadcast::Sender<TransferProgress>,
    reload_tx: broadcast::Sender<ReloadNotice>,
    manual_close: AtomicBool,
    reconnecting: AtomicBool,
}

impl ConnectionManager {
    /// Creates a new manager (not yet connected).
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let (reload_tx, _) = broadcast::channel(RELOAD_CHANNEL_CAPACITY);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            config,
            client_id: Uuid::new_v4(),
            codec: CodecWorker::spawn(),
            correlator: Correlator::new(),
            events: EventBus::new(),
            writer: Mutex::new(None),
            read_task: std::sync::Mutex::new(None),
            state_tx,
            connect_gate: Mutex::new(()),
            progress_tx,
            reload_tx,
            manual_close: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
        })
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Returns whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The stable client identifier.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// The client-side event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Subscribes to split-transfer progress telemetry.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<TransferProgress> {
        self.progress_tx.subscribe()
    }

    /// Subscribes to reload pushes addressed to this client.
    pub fn subscribe_reloads(&self) -> broadcast::Receiver<ReloadNotice> {
        self.reload_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Connects to the server and completes the handshake.
    ///
    /// A no-op when already connected or while another attempt is in
    /// flight; a second transport is never opened.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let Ok(_gate) = self.connect_gate.try_lock() else {
            tracing::debug!("connect already in flight");
            return Ok(());
        };
        if self.is_connected() {
            return Ok(());
        }

        self.manual_close.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        // Drop any stale handle before dialing.
        self.teardown_stream().await;

        tracing::debug!("connecting to {}", self.config.addr);
        let dial = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await;
        let tcp_stream = match dial {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Io(e));
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Timeout);
            }
        };
        tcp_stream.set_nodelay(true).ok();

        let stream = match self.config.tls {
            Some(ref tls_config) if tls_config.enabled => {
                let host = self.config.addr.ip().to_string();
                let (connector, server_name) = if tls_config.insecure {
                    tracing::warn!("using insecure TLS (certificate verification disabled)");
                    create_insecure_tls_connector(tls_config, &host)?
                } else {
                    create_tls_connector(tls_config, &host)?
                };

                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| {
                        self.set_state(ConnectionState::Disconnected);
                        ClientError::TlsHandshake(e.to_string())
                    })?;
                ClientStream::Tls(Box::new(tls_stream))
            }
            _ => ClientStream::Plain(tcp_stream),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);

        let Some(conn) = self.weak.upgrade() else {
            return Err(ClientError::ConnectionLost);
        };
        let task = tokio::spawn(async move {
            conn.read_loop(read_half).await;
        });
        *self.read_task.lock().unwrap() = Some(task);

        // The server drives the handshake: client-get-id, then
        // connected once it has registered us.
        if self
            .wait_for_state(ConnectionState::Connected, self.config.connect_timeout)
            .await
            .is_err()
        {
            tracing::debug!("handshake timed out");
            self.teardown_stream().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(ClientError::Timeout);
        }

        Ok(())
    }

    /// Closes the connection. Pending calls are rejected; automatic
    /// reconnection stays off until the next `connect`.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.manual_close.store(true, Ordering::SeqCst);
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Closing
        ) {
            return Ok(());
        }

        self.set_state(ConnectionState::Closing);
        self.teardown_stream().await;

        let rejected = self.correlator.reject_all();
        if rejected > 0 {
            tracing::debug!("close rejected {} pending calls", rejected);
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Sends one already-encoded payload as a frame.
    ///
    /// Waits up to `send_wait` for the connected state, then fails with
    /// `NotConnected`.
    pub async fn send(&self, payload: Bytes) -> Result<(), ClientError> {
        self.wait_for_state(ConnectionState::Connected, self.config.send_wait)
            .await
            .map_err(|_| ClientError::NotConnected)?;
        self.write_frame(Frame::new(payload)).await
    }

    /// Performs one call: encode (split-aware), send fragments in
    /// order, await the correlated response.
    pub async fn call(&self, command: String, params: Vec<Value>) -> Result<Value, ClientError> {
        let uuid = Uuid::new_v4();
        tracing::debug!("call {} uuid={}", command, uuid);

        let request = Message::Request {
            client_name: self.config.client_name.clone(),
            uuid,
            command,
            params,
        };
        let encoded = self.codec.encode(request).await?;
        let rx = self.correlator.register(uuid, encoded.total_size);

        if encoded.is_split() {
            let _ = self.progress_tx.send(TransferProgress::Request {
                uuid,
                full_size: encoded.total_size,
                completed_size: 0,
            });
        }

        for chunk in encoded.chunks {
            if let Err(e) = self.send(chunk).await {
                self.correlator.remove(&uuid);
                return Err(e);
            }
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.correlator.remove(&uuid);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn wait_for_state(&self, target: ConnectionState, wait: Duration) -> Result<(), ()> {
        let mut rx = self.state_tx.subscribe();
        tokio::time::timeout(wait, async move {
            loop {
                if *rx.borrow_and_update() == target {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(|_| ())?;

        if self.state() == target {
            Ok(())
        } else {
            Err(())
        }
    }

    async fn teardown_stream(&self) {
        if let Some(task) = self.read_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
        writer.write_all(&encoded).await.map_err(ClientError::Io)?;
        Ok(())
    }

    async fn write_message(&self, message: &Message) -> Result<(), ClientError> {
        let payload = Bytes::from(serde_json::to_vec(message)?);
        self.write_frame(Frame::new(payload)).await
    }

    async fn read_loop(self: Arc<Self>, mut reader: ReadHalf<ClientStream>) {
        let mut decoder = Decoder::new();
        let mut accumulator = SplitAccumulator::new();
        let mut buf = vec![0u8; self.config.read_buffer_size];

        'outer: loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("server closed the connection");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("read error: {}", e);
                    break;
                }
            };
            decoder.extend(&buf[..n]);

            loop {
                match decoder.decode_frame() {
                    Ok(Some(frame)) => {
                        if frame.flags.is_ping() {
                            if let Err(e) = self.write_frame(Frame::pong()).await {
                                tracing::debug!("failed to answer ping: {}", e);
                            }
                            continue;
                        }
                        if frame.flags.is_pong() {
                            continue;
                        }
                        if let Err(e) = self
                            .handle_payload(frame.payload, &mut accumulator)
                            .await
                        {
                            tracing::warn!("failed to handle server message: {}", e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("protocol error from server: {}", e);
                        break 'outer;
                    }
                }
            }
        }

        self.on_connection_lost().await;
    }

    async fn handle_payload(
        &self,
        payload: Bytes,
        accumulator: &mut SplitAccumulator,
    ) -> Result<(), ClientError> {
        let message = self.codec.decode(payload).await?;
        self.handle_message(message, accumulator).await
    }

    async fn handle_message(
        &self,
        message: Message,
        accumulator: &mut SplitAccumulator,
    ) -> Result<(), ClientError> {
        match message {
            Message::ClientGetId => {
                self.write_message(&Message::ClientGetIdResponse {
                    body: self.client_id.to_string(),
                })
                .await?;
            }
            Message::Connected => {
                tracing::info!("connected to {}", self.config.addr);
                self.set_state(ConnectionState::Connected);
                self.spawn_listener_reregistration();
            }
            Message::Response {
                req_uuid,
                state,
                body,
            } => {
                self.correlator.resolve(req_uuid, state, body);
            }
            Message::ResponseForSplit {
                req_uuid,
                completed_size,
            } => {
                if let Some(full_size) = self.correlator.request_size(&req_uuid) {
                    let _ = self.progress_tx.send(TransferProgress::Request {
                        uuid: req_uuid,
                        full_size,
                        completed_size,
                    });
                }
            }
            Message::ResponseSplit {
                req_uuid,
                full_size,
                index,
                body,
            } => {
                let progress = accumulator.push(req_uuid, full_size, index, body)?;
                let _ = self.progress_tx.send(TransferProgress::Response {
                    req_uuid,
                    full_size,
                    completed_size: progress.completed_size,
                });
                if let Some(text) = progress.full_text {
                    match self.codec.decode(Bytes::from(text)).await? {
                        Message::Response {
                            req_uuid,
                            state,
                            body,
                        } => self.correlator.resolve(req_uuid, state, body),
                        other => tracing::warn!(
                            "reassembled split payload was not a response: {}",
                            other.kind()
                        ),
                    }
                }
            }
            Message::Event { key, body } => {
                self.events.dispatch(&key, &body);
            }
            Message::ClientReload {
                client_name,
                changed_file_set,
            } => {
                let addressed_to_us = client_name
                    .as_deref()
                    .map_or(true, |name| name == self.config.client_name);
                if addressed_to_us {
                    let _ = self.reload_tx.send(ReloadNotice {
                        client_name,
                        changed_file_set,
                    });
                }
            }
            other => {
                tracing::warn!("unexpected message from server: {}", other.kind());
            }
        }
        Ok(())
    }

    /// Re-announces every stored event listener after a reconnect.
    fn spawn_listener_reregistration(&self) {
        let registrations = self.events.registrations();
        if registrations.is_empty() {
            return;
        }

        let Some(conn) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            for reg in registrations {
                let params = vec![json!(reg.key), json!(reg.event_name), reg.info.clone()];
                if let Err(e) = conn
                    .call(SpecialCommand::AddEventListener.as_str().to_string(), params)
                    .await
                {
                    tracing::warn!("failed to re-register listener {}: {}", reg.key, e);
                }
            }
        });
    }

    async fn on_connection_lost(&self) {
        self.set_state(ConnectionState::Disconnected);
        *self.writer.lock().await = None;

        let rejected = self.correlator.reject_all();
        if rejected > 0 {
            tracing::warn!("connection lost, rejected {} pending calls", rejected);
        }

        // Listener registrations stay; delivery resumes once they are
        // re-announced after a reconnect.
        let listeners = self.events.len();
        if listeners > 0 {
            tracing::debug!("event delivery paused for {} listeners", listeners);
        }

        if self.manual_close.load(Ordering::SeqCst) {
            return;
        }
        let Some(strategy) = self.config.reconnect.clone() else {
            tracing::error!(
                "connection to {} lost and reconnect is disabled",
                self.config.addr
            );
            return;
        };
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(conn) = self.weak.upgrade() else {
            return;
        };
        reconnect_driver::spawn(conn, strategy);
    }
}

/// Drives the reconnect loop from a child module.
///
/// The spawned future awaits [`ConnectionManager::connect`]; spawning it
/// from this submodule (rather than inline in `on_connection_lost`) lets
/// the compiler resolve that opaque future's `Send`-ness, which it cannot
/// do within `connect`'s own defining module.
mod reconnect_driver {
    use super::*;

    pub(super) fn spawn(conn: Arc<ConnectionManager>, strategy: Arc<dyn ReconnectStrategy>) {
        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                if conn.manual_close.load(Ordering::SeqCst) {
                    break;
                }
                if !strategy.should_reconnect(attempt) {
                    tracing::error!(
                        "giving up on {} after {} reconnect attempts",
                        conn.config.addr,
                        attempt
                    );
                    break;
                }

                let delay = strategy.delay(attempt);
                tracing::info!(
                    "reconnecting to {} in {:?} (attempt {})",
                    conn.config.addr,
                    delay,
                    attempt + 1
                );
                tokio::time::sleep(delay).await;
                attempt += 1;

                match conn.connect().await {
                    Ok(()) if conn.is_connected() => {
                        tracing::info!("reconnected to {}", conn.config.addr);
                        break;
                    }
                    Ok(()) => continue,
                    Err(e) => {
                        tracing::warn!("reconnect attempt {} failed: {}", attempt, e);
                    }
                }
            }
            conn.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}
