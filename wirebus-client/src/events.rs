//! Client-side event bus.
//!
//! Subscribers register a callback under a key; incoming `event`
//! messages fan out to the key's subscribers synchronously, in
//! registration order. A panicking subscriber is logged and never blocks
//! delivery to the others. Registrations are kept across reconnects so
//! the connection can re-announce them to the server.

use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Callback invoked with the event body.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// A listener registration as announced to the server.
#[derive(Clone)]
pub struct ListenerRegistration {
    /// Server-side addressing key (unique per registration).
    pub key: String,
    /// Event type name the listener is interested in.
    pub event_name: String,
    /// Arbitrary listener metadata, used by emitters to target a subset.
    pub info: Value,
}

struct Listener {
    registration: ListenerRegistration,
    callback: EventCallback,
}

/// Key-addressed subscriber table.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a listener. The caller is responsible for announcing the
    /// registration to the server.
    pub fn insert(
        &self,
        key: impl Into<String>,
        event_name: impl Into<String>,
        info: Value,
        callback: EventCallback,
    ) {
        self.listeners.lock().unwrap().push(Listener {
            registration: ListenerRegistration {
                key: key.into(),
                event_name: event_name.into(),
                info,
            },
            callback,
        });
    }

    /// Removes the listener registered under `key`. Returns whether one
    /// existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|l| l.registration.key != key);
        listeners.len() < before
    }

    /// Snapshot of every registration, for re-announcing after a
    /// reconnect.
    pub fn registrations(&self) -> Vec<ListenerRegistration> {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.registration.clone())
            .collect()
    }

    /// Fans an event body out to every subscriber of `key`, in
    /// registration order. Returns how many callbacks ran.
    pub fn dispatch(&self, key: &str, body: &Value) -> usize {
        let targets: Vec<EventCallback> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .iter()
                .filter(|l| l.registration.key == key)
                .map(|l| l.callback.clone())
                .collect()
        };

        let mut delivered = 0;
        for callback in targets {
            let result = catch_unwind(AssertUnwindSafe(|| callback(body.clone())));
            if result.is_err() {
                tracing::warn!("event subscriber for key {} panicked", key);
            }
            delivered += 1;
        }
        delivered
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().unwrap().is_empty()
    }
}
