//! Codec worker: encode/decode on a dedicated thread.
//!
//! The connection task never serializes payloads itself; it submits jobs
//! over an async channel and awaits the reply. Each job carries a
//! locally generated id, distinct from any protocol uuid, used only to
//! correlate worker-side logging with replies. Payload buffers are
//! `Bytes`, so crossing the thread boundary moves a reference count, not
//! the data.

use crate::codec::{decode_message, encode_message, EncodedMessage};
use crate::error::CodecError;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use wirebus_protocol::Message;

enum JobKind {
    Encode {
        message: Box<Message>,
        reply: oneshot::Sender<Result<EncodedMessage, CodecError>>,
    },
    Decode {
        data: Bytes,
        reply: oneshot::Sender<Result<Message, CodecError>>,
    },
}

struct Job {
    id: u64,
    kind: JobKind,
}

struct Inner {
    tx: mpsc::UnboundedSender<Job>,
    next_id: AtomicU64,
}

/// Handle to the codec worker thread. Cheap to clone; the thread exits
/// when the last handle is dropped.
#[derive(Clone)]
pub struct CodecWorker {
    inner: Arc<Inner>,
}

impl CodecWorker {
    /// Spawns the worker thread.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("wirebus-codec".to_string())
            .spawn(move || run_worker(rx))
            .expect("failed to spawn codec worker thread");

        Self {
            inner: Arc::new(Inner {
                tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Serializes a message off-thread, splitting it when oversized.
    pub async fn encode(&self, message: Message) -> Result<EncodedMessage, CodecError> {
        let (reply, rx) = oneshot::channel();
        self.submit(JobKind::Encode {
            message: Box::new(message),
            reply,
        })?;
        rx.await.map_err(|_| CodecError::WorkerStopped)?
    }

    /// Deserializes raw payload bytes off-thread.
    pub async fn decode(&self, data: Bytes) -> Result<Message, CodecError> {
        let (reply, rx) = oneshot::channel();
        self.submit(JobKind::Decode { data, reply })?;
        rx.await.map_err(|_| CodecError::WorkerStopped)?
    }

    fn submit(&self, kind: JobKind) -> Result<(), CodecError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .tx
            .send(Job { id, kind })
            .map_err(|_| CodecError::WorkerStopped)
    }
}

fn run_worker(mut rx: mpsc::UnboundedReceiver<Job>) {
    tracing::debug!("codec worker started");

    while let Some(job) = rx.blocking_recv() {
        match job.kind {
            JobKind::Encode { message, reply } => {
                let result = encode_message(&message).map_err(|e| {
                    tracing::debug!("codec job {} encode failed: {}", job.id, e);
                    CodecError::encode(e)
                });
                // A dropped reply means the caller gave up; nothing to do.
                let _ = reply.send(result);
            }
            JobKind::Decode { data, reply } => {
                let result = decode_message(&data).map_err(|e| {
                    tracing::debug!("codec job {} decode failed: {}", job.id, e);
                    CodecError::decode(e)
                });
                let _ = reply.send(result);
            }
        }
    }

    tracing::debug!("codec worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn sample_request(payload: &str) -> Message {
        Message::Request {
            client_name: "studio".to_string(),
            uuid: Uuid::new_v4(),
            command: "EchoService.echo".to_string(),
            params: vec![json!(payload)],
        }
    }

    #[tokio::test]
    async fn test_encode_decode_roundtrip() {
        let worker = CodecWorker::spawn();
        let msg = sample_request("ping");

        let encoded = worker.encode(msg.clone()).await.unwrap();
        assert_eq!(encoded.chunks.len(), 1);

        let decoded = worker.decode(encoded.chunks[0].clone()).await.unwrap();
        match (msg, decoded) {
            (Message::Request { uuid: a, .. }, Message::Request { uuid: b, .. }) => {
                assert_eq!(a, b);
            }
            _ => panic!("expected request variants"),
        }
    }

    #[tokio::test]
    async fn test_decode_error_is_structured() {
        let worker = CodecWorker::spawn();
        let err = worker
            .decode(Bytes::from_static(b"{broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_keep_their_replies() {
        let worker = CodecWorker::spawn();
        let a = sample_request("aaaa");
        let b = sample_request("bbbb");

        let (ra, rb) = tokio::join!(worker.encode(a), worker.encode(b));
        let ta = String::from_utf8(ra.unwrap().chunks[0].to_vec()).unwrap();
        let tb = String::from_utf8(rb.unwrap().chunks[0].to_vec()).unwrap();

        assert!(ta.contains("aaaa"));
        assert!(tb.contains("bbbb"));
    }

    #[tokio::test]
    async fn test_oversized_event_reports_error() {
        let worker = CodecWorker::spawn();
        let msg = Message::Event {
            key: "k".to_string(),
            body: json!("z".repeat(wirebus_protocol::MAX_MESSAGE_SIZE + 1)),
        };
        let err = worker.encode(msg).await.unwrap_err();
        assert!(matches!(err, CodecError::Encode { .. }));
    }
}
