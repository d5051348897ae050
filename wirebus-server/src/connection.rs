//! Per-connection session handling.
//!
//! Each accepted stream runs through the get-id handshake, registers in
//! the client registry, then enters one select loop. Responses and
//! events share the connection's outbound queue, so the peer sees one
//! ordered stream; requests dispatch on their own tasks so slow
//! handlers never block the loop.

use crate::error::ServerError;
use crate::registry::{ClientHandle, ClientRegistry};
use crate::router::CommandRouter;
use crate::stream::MaybeTlsStream;
use bytes::Bytes;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;
use wirebus_codec::CodecWorker;
use wirebus_protocol::error::codes;
use wirebus_protocol::{Decoder, ErrorBody, Frame, Message, SplitAccumulator};

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Timings the connection loop runs with.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub keepalive: Duration,
    pub accumulator_ttl: Duration,
    pub read_buffer_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            keepalive: Duration::from_secs(10),
            accumulator_ttl: Duration::from_secs(60),
            read_buffer_size: 8 * 1024,
        }
    }
}

/// Runs one client connection to completion.
pub async fn handle_connection(
    stream: MaybeTlsStream,
    addr: SocketAddr,
    router: Arc<CommandRouter>,
    registry: Arc<ClientRegistry>,
    codec: CodecWorker,
    settings: ConnectionSettings,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; settings.read_buffer_size];

    // The server drives the handshake: ask who the peer is.
    write_message(&mut writer, &Message::ClientGetId).await?;
    let client_id = await_client_id(
        &mut reader,
        &mut decoder,
        &mut buf,
        &codec,
        settings.handshake_timeout,
    )
    .await?;

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
    let handle = Arc::new(ClientHandle::new(client_id, addr, outbound_tx));

    // A reconnecting client supersedes its stale self.
    for stale in registry.register(handle.clone()) {
        tracing::debug!(
            "terminating stale connection {} for client {}",
            stale.connection_id,
            stale.client_id
        );
        stale.terminate();
    }
    tracing::info!("client {} connected from {}", handle.client_id, addr);

    write_message(&mut writer, &Message::Connected).await?;

    let mut accumulator = SplitAccumulator::new();
    let mut alive = true;

    let mut keepalive = tokio::time::interval(settings.keepalive);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await;

    let mut sweep = tokio::time::interval(settings.accumulator_ttl.max(Duration::from_secs(1)));
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sweep.tick().await;

    let result = 'conn: loop {
        tokio::select! {
            biased;

            Some(message) = outbound_rx.recv() => {
                if let Err(e) = send_message(&mut writer, &codec, message).await {
                    break 'conn Err(e);
                }
            }

            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        tracing::debug!("client {} closed the connection", handle.client_id);
                        break 'conn Ok(());
                    }
                    Ok(n) => decoder.extend(&buf[..n]),
                    Err(e) => break 'conn Err(ServerError::Io(e)),
                }
            }

            _ = keepalive.tick() => {
                if !alive {
                    tracing::warn!("client {} missed keepalive", handle.client_id);
                    break 'conn Err(ServerError::KeepaliveExpired);
                }
                alive = false;
                if let Err(e) = write_frame(&mut writer, Frame::ping()).await {
                    break 'conn Err(e);
                }
            }

            _ = sweep.tick() => {
                let evicted = accumulator.evict_idle(settings.accumulator_ttl);
                if evicted > 0 {
                    tracing::warn!(
                        "evicted {} abandoned split transfers for client {}",
                        evicted,
                        handle.client_id
                    );
                }
            }

            _ = handle.terminated() => {
                break 'conn Err(ServerError::Superseded);
            }

            _ = shutdown.recv() => {
                break 'conn Err(ServerError::ShuttingDown);
            }
        }

        // Drain complete frames after any wakeup.
        loop {
            match decoder.decode_frame() {
                Ok(Some(frame)) => {
                    if frame.flags.is_pong() {
                        alive = true;
                        continue;
                    }
                    if frame.flags.is_ping() {
                        if let Err(e) = write_frame(&mut writer, Frame::pong()).await {
                            break 'conn Err(e);
                        }
                        continue;
                    }
                    alive = true;
                    if let Err(e) =
                        handle_payload(frame.payload, &router, &handle, &codec, &mut accumulator)
                            .await
                    {
                        tracing::warn!(
                            "failed to handle message from client {}: {}",
                            handle.client_id,
                            e
                        );
                    }
                }
                Ok(None) => break,
                Err(e) => break 'conn Err(e.into()),
            }
        }
    };

    registry.deregister(&handle.connection_id);
    tracing::info!("client {} disconnected", handle.client_id);
    result
}

async fn await_client_id(
    reader: &mut ReadHalf<MaybeTlsStream>,
    decoder: &mut Decoder,
    buf: &mut [u8],
    codec: &CodecWorker,
    timeout: Duration,
) -> Result<String, ServerError> {
    let handshake = async {
        loop {
            let n = reader.read(buf).await?;
            if n == 0 {
                return Err(ServerError::HandshakeFailed(
                    "peer closed during handshake".to_string(),
                ));
            }
            decoder.extend(&buf[..n]);

            while let Some(frame) = decoder.decode_frame()? {
                if frame.is_control() {
                    continue;
                }
                match codec.decode(frame.payload).await? {
                    Message::ClientGetIdResponse { body } => return Ok(body),
                    other => {
                        tracing::debug!("ignoring {} during handshake", other.kind());
                    }
                }
            }
        }
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| ServerError::HandshakeFailed("timed out waiting for client id".to_string()))?
}

async fn handle_payload(
    payload: Bytes,
    router: &Arc<CommandRouter>,
    handle: &Arc<ClientHandle>,
    codec: &CodecWorker,
    accumulator: &mut SplitAccumulator,
) -> Result<(), ServerError> {
    match codec.decode(payload).await? {
        Message::Request {
            uuid,
            command,
            params,
            ..
        } => {
            spawn_dispatch(router.clone(), handle.clone(), uuid, command, params);
        }
        Message::RequestSplit {
            uuid,
            full_size,
            index,
            body,
        } => match accumulator.push(uuid, full_size, index, body) {
            Ok(progress) => {
                // Progress ack; advisory, delivery order shared with
                // responses.
                handle
                    .try_enqueue(Message::ResponseForSplit {
                        req_uuid: uuid,
                        completed_size: progress.completed_size,
                    });

                if let Some(text) = progress.full_text {
                    match codec.decode(Bytes::from(text)).await? {
                        Message::Request {
                            uuid,
                            command,
                            params,
                            ..
                        } => {
                            spawn_dispatch(
                                router.clone(),
                                handle.clone(),
                                uuid,
                                command,
                                params,
                            );
                        }
                        other => {
                            tracing::warn!(
                                "reassembled split payload was not a request: {}",
                                other.kind()
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("dropping split transfer {}: {}", uuid, e);
            }
        },
        // A late duplicate of the handshake reply; harmless.
        Message::ClientGetIdResponse { .. } => {}
        other => {
            tracing::warn!("unexpected message from client: {}", other.kind());
        }
    }
    Ok(())
}

/// Dispatches one request on its own task and queues the response.
/// A panicking handler yields an error response, not a dead connection.
fn spawn_dispatch(
    router: Arc<CommandRouter>,
    client: Arc<ClientHandle>,
    uuid: Uuid,
    command: String,
    params: Vec<Value>,
) {
    tokio::spawn(async move {
        let inner = {
            let router = router.clone();
            let client = client.clone();
            let command = command.clone();
            tokio::spawn(async move { router.dispatch(&client, uuid, &command, params).await })
        };

        let response = match inner.await {
            Ok(response) => response,
            Err(e) if e.is_panic() => {
                tracing::error!("handler for {} panicked", command);
                Message::error(
                    uuid,
                    ErrorBody::new("handler panicked").with_code(codes::HANDLER_ERROR),
                )
            }
            Err(_) => return,
        };

        if !client.enqueue(response).await {
            tracing::debug!("connection gone before response for {}", uuid);
        }
    });
}

async fn send_message(
    writer: &mut WriteHalf<MaybeTlsStream>,
    codec: &CodecWorker,
    message: Message,
) -> Result<(), ServerError> {
    let encoded = codec.encode(message).await?;
    for chunk in encoded.chunks {
        write_frame(writer, Frame::new(chunk)).await?;
    }
    Ok(())
}

async fn write_message(
    writer: &mut WriteHalf<MaybeTlsStream>,
    message: &Message,
) -> Result<(), ServerError> {
    let payload = Bytes::from(serde_json::to_vec(message)?);
    write_frame(writer, Frame::new(payload)).await
}

async fn write_frame(
    writer: &mut WriteHalf<MaybeTlsStream>,
    frame: Frame,
) -> Result<(), ServerError> {
    let encoded = frame.encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}
