//! Connected-client registry and event targeting.
//!
//! Every accepted connection registers a [`ClientHandle`] here after
//! the get-id handshake. The registry is the server side of the event
//! multiplexer: it knows which listener keys live on which connection
//! and enqueues `event` messages on the matching outbound queues, which
//! share ordering with responses on each connection's single stream.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;
use wirebus_protocol::Message;

/// One event listener registration, as announced by a client.
#[derive(Debug, Clone)]
pub struct ListenerInfo {
    /// Addressing key, unique per registration.
    pub key: String,
    /// Event type name.
    pub event_name: String,
    /// Arbitrary metadata emitters filter on.
    pub info: Value,
}

/// Server-side handle for one connected client.
pub struct ClientHandle {
    /// Identifier supplied by the client; stable across reconnects.
    pub client_id: String,
    /// Identifier of this particular connection.
    pub connection_id: Uuid,
    /// Remote peer address.
    pub remote_addr: SocketAddr,
    /// When the connection registered.
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Message>,
    listeners: Mutex<Vec<ListenerInfo>>,
    terminated: Notify,
}

impl ClientHandle {
    pub fn new(client_id: String, remote_addr: SocketAddr, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            client_id,
            connection_id: Uuid::new_v4(),
            remote_addr,
            connected_at: Utc::now(),
            outbound,
            listeners: Mutex::new(Vec::new()),
            terminated: Notify::new(),
        }
    }

    /// Queues a message on this connection's ordered outbound stream,
    /// waiting for room.
    pub async fn enqueue(&self, message: Message) -> bool {
        self.outbound.send(message).await.is_ok()
    }

    /// Queues a message without waiting. Used for fan-out, where one
    /// slow client must not stall delivery to the others.
    pub fn try_enqueue(&self, message: Message) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "dropping message for client {}: {}",
                    self.client_id,
                    e
                );
                false
            }
        }
    }

    pub fn add_listener(&self, listener: ListenerInfo) {
        self.listeners.lock().push(listener);
    }

    pub fn remove_listener(&self, key: &str) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.key != key);
        listeners.len() < before
    }

    pub fn listeners(&self) -> Vec<ListenerInfo> {
        self.listeners.lock().clone()
    }

    /// Asks the connection task to shut this connection down.
    pub fn terminate(&self) {
        self.terminated.notify_one();
    }

    /// Resolves when [`ClientHandle::terminate`] is called.
    pub async fn terminated(&self) {
        self.terminated.notified().await;
    }
}

/// All currently connected clients, keyed by connection id.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<Uuid, Arc<ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. Any existing connection with the same
    /// client id is removed and returned so the caller can terminate it
    /// (a reconnecting client supersedes its stale self).
    pub fn register(&self, handle: Arc<ClientHandle>) -> Vec<Arc<ClientHandle>> {
        let displaced: Vec<Arc<ClientHandle>> = self
            .clients
            .iter()
            .filter(|entry| {
                entry.client_id == handle.client_id
                    && entry.connection_id != handle.connection_id
            })
            .map(|entry| entry.value().clone())
            .collect();

        for stale in &displaced {
            self.clients.remove(&stale.connection_id);
        }

        self.clients.insert(handle.connection_id, handle);
        displaced
    }

    /// Removes a connection. Returns whether it was registered.
    pub fn deregister(&self, connection_id: &Uuid) -> bool {
        self.clients.remove(connection_id).is_some()
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Every listener registration for `event_name`, across all clients.
    pub fn listener_infos_for(&self, event_name: &str) -> Vec<ListenerInfo> {
        self.clients
            .iter()
            .flat_map(|entry| {
                entry
                    .listeners()
                    .into_iter()
                    .filter(|l| l.event_name == event_name)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Delivers `data` as an `event` message to every listener whose key
    /// is in `target_keys`. Returns the number of messages queued.
    pub fn emit_to_keys(&self, target_keys: &[String], data: &Value) -> usize {
        let mut queued = 0;
        for entry in self.clients.iter() {
            for listener in entry.listeners() {
                if !target_keys.contains(&listener.key) {
                    continue;
                }
                let message = Message::Event {
                    key: listener.key.clone(),
                    body: data.clone(),
                };
                if entry.try_enqueue(message) {
                    queued += 1;
                }
            }
        }
        queued
    }

    /// Pushes a `client-reload` notice to every connected client.
    /// Returns the number of messages queued.
    pub fn broadcast_reload(
        &self,
        client_name: Option<String>,
        changed_file_set: BTreeSet<String>,
    ) -> usize {
        let mut queued = 0;
        for entry in self.clients.iter() {
            let message = Message::ClientReload {
                client_name: client_name.clone(),
                changed_file_set: changed_file_set.clone(),
            };
            if entry.try_enqueue(message) {
                queued += 1;
            }
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle_with_id(client_id: &str) -> (Arc<ClientHandle>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::new(ClientHandle::new(
            client_id.to_string(),
            "127.0.0.1:50000".parse().unwrap(),
            tx,
        ));
        (handle, rx)
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = ClientRegistry::new();
        let (handle, _rx) = handle_with_id("c1");

        assert!(registry.register(handle.clone()).is_empty());
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister(&handle.connection_id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_client_id_is_displaced() {
        let registry = ClientRegistry::new();
        let (old, _rx_old) = handle_with_id("c1");
        let (new, _rx_new) = handle_with_id("c1");

        registry.register(old.clone());
        let displaced = registry.register(new.clone());

        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].connection_id, old.connection_id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_emit_targets_only_matching_keys() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = handle_with_id("a");
        let (b, mut rx_b) = handle_with_id("b");

        a.add_listener(ListenerInfo {
            key: "k1".to_string(),
            event_name: "DataChanged".to_string(),
            info: json!({"scope": "x"}),
        });
        b.add_listener(ListenerInfo {
            key: "k2".to_string(),
            event_name: "DataChanged".to_string(),
            info: json!({"scope": "y"}),
        });
        registry.register(a);
        registry.register(b);

        let queued = registry.emit_to_keys(&["k1".to_string()], &json!({"n": 1}));
        assert_eq!(queued, 1);

        match rx_a.try_recv().unwrap() {
            Message::Event { key, body } => {
                assert_eq!(key, "k1");
                assert_eq!(body["n"], 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listener_infos_for_event() {
        let registry = ClientRegistry::new();
        let (a, _rx) = handle_with_id("a");
        a.add_listener(ListenerInfo {
            key: "k1".to_string(),
            event_name: "DataChanged".to_string(),
            info: json!({}),
        });
        a.add_listener(ListenerInfo {
            key: "k2".to_string(),
            event_name: "Other".to_string(),
            info: json!({}),
        });
        registry.register(a);

        let infos = registry.listener_infos_for("DataChanged");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].key, "k1");
    }

    #[tokio::test]
    async fn test_broadcast_reload_reaches_all() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = handle_with_id("a");
        let (b, mut rx_b) = handle_with_id("b");
        registry.register(a);
        registry.register(b);

        let changed: BTreeSet<String> = ["main.css".to_string()].into_iter().collect();
        let queued = registry.broadcast_reload(Some("studio".to_string()), changed);
        assert_eq!(queued, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Message::ClientReload {
                    client_name,
                    changed_file_set,
                } => {
                    assert_eq!(client_name.as_deref(), Some("studio"));
                    assert!(changed_file_set.contains("main.css"));
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let (handle, _rx) = handle_with_id("a");
        handle.add_listener(ListenerInfo {
            key: "k1".to_string(),
            event_name: "E".to_string(),
            info: json!({}),
        });

        assert!(handle.remove_listener("k1"));
        assert!(!handle.remove_listener("k1"));
        assert!(handle.listeners().is_empty());
    }
}
