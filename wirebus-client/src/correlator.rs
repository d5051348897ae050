//! Request/response correlation.
//!
//! Every outgoing call registers a pending entry keyed by its uuid; the
//! entry is removed exactly once, by the matching response, a call
//! timeout, or connection loss. Responses may arrive in any order
//! relative to other in-flight calls.

use crate::error::ClientError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;
use wirebus_protocol::{ErrorBody, ResponseState};

struct PendingCall {
    tx: oneshot::Sender<Result<Value, ClientError>>,
    /// Encoded request size, kept for progress reporting on split sends.
    request_size: u64,
}

/// The pending-call table. Owned by the connection; the lock is never
/// held across an await.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<Uuid, PendingCall>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh call and returns the receiver its response
    /// resolves through.
    pub fn register(
        &self,
        uuid: Uuid,
        request_size: u64,
    ) -> oneshot::Receiver<Result<Value, ClientError>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(uuid, PendingCall { tx, request_size });
        rx
    }

    /// Resolves a pending call from a terminal response. Unknown uuids
    /// are ignored (stale response after timeout or cancellation).
    pub fn resolve(&self, req_uuid: Uuid, state: ResponseState, body: Value) {
        let Some(call) = self.pending.lock().unwrap().remove(&req_uuid) else {
            tracing::debug!("no pending call for response {}", req_uuid);
            return;
        };

        let outcome = match state {
            ResponseState::Success => Ok(body),
            ResponseState::Error => {
                let detail = serde_json::from_value::<ErrorBody>(body.clone())
                    .unwrap_or_else(|_| ErrorBody::new(body.to_string()));
                Err(ClientError::Server(detail))
            }
        };

        // A dropped receiver means the caller gave up; nothing to do.
        let _ = call.tx.send(outcome);
    }

    /// Removes a pending call without resolving it (timeout, send
    /// failure). Returns whether an entry existed.
    pub fn remove(&self, uuid: &Uuid) -> bool {
        self.pending.lock().unwrap().remove(uuid).is_some()
    }

    /// Returns the encoded request size recorded for a pending call.
    pub fn request_size(&self, uuid: &Uuid) -> Option<u64> {
        self.pending.lock().unwrap().get(uuid).map(|c| c.request_size)
    }

    /// Rejects every pending call with `ConnectionLost` and empties the
    /// table. Returns how many calls were rejected.
    pub fn reject_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(ClientError::ConnectionLost));
        }
        count
    }

    /// Number of in-flight calls.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_success() {
        let correlator = Correlator::new();
        let uuid = Uuid::new_v4();
        let rx = correlator.register(uuid, 10);

        correlator.resolve(uuid, ResponseState::Success, json!({"ok": true}));

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_error_surfaces_body() {
        let correlator = Correlator::new();
        let uuid = Uuid::new_v4();
        let rx = correlator.register(uuid, 10);

        let body = serde_json::to_value(ErrorBody::new("boom").with_code("HANDLER_ERROR")).unwrap();
        correlator.resolve(uuid, ResponseState::Error, body);

        match rx.await.unwrap() {
            Err(ClientError::Server(detail)) => {
                assert_eq!(detail.message, "boom");
                assert_eq!(detail.code.as_deref(), Some("HANDLER_ERROR"));
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_independently() {
        let correlator = Correlator::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(a, b);

        let rx_a = correlator.register(a, 1);
        let rx_b = correlator.register(b, 1);

        // Resolve out of send order.
        correlator.resolve(b, ResponseState::Success, json!("b"));
        correlator.resolve(a, ResponseState::Success, json!("a"));

        assert_eq!(rx_a.await.unwrap().unwrap(), json!("a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("b"));
    }

    #[tokio::test]
    async fn test_reject_all_clears_table() {
        let correlator = Correlator::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            receivers.push(correlator.register(Uuid::new_v4(), 1));
        }

        assert_eq!(correlator.reject_all(), 5);
        assert_eq!(correlator.pending_count(), 0);

        for rx in receivers {
            match rx.await.unwrap() {
                Err(ClientError::ConnectionLost) => {}
                other => panic!("expected ConnectionLost, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_stale_response_ignored() {
        let correlator = Correlator::new();
        // No registration: resolving must be a no-op, not a panic.
        correlator.resolve(Uuid::new_v4(), ResponseState::Success, json!(null));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_remove_and_request_size() {
        let correlator = Correlator::new();
        let uuid = Uuid::new_v4();
        let _rx = correlator.register(uuid, 1234);

        assert_eq!(correlator.request_size(&uuid), Some(1234));
        assert!(correlator.remove(&uuid));
        assert!(!correlator.remove(&uuid));
        assert_eq!(correlator.request_size(&uuid), None);
    }
}
