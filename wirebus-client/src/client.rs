//! High-level client API.

use crate::connection::{
    ConnectionConfig, ConnectionManager, ReloadNotice, TransferProgress,
};
use crate::error::ClientError;
use crate::events::EventCallback;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;
use wirebus_protocol::{MethodCommand, SpecialCommand};

/// High-level client for wirebus.
///
/// Wraps a [`ConnectionManager`] with the service-call and event-
/// listener surface. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    conn: Arc<ConnectionManager>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: ConnectionManager::new(config),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// The underlying connection manager.
    pub fn connection(&self) -> Arc<ConnectionManager> {
        self.conn.clone()
    }

    /// Invokes `Service.Method` on the server with positional arguments.
    pub async fn call(
        &self,
        service_name: &str,
        method_name: &str,
        params: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let command = MethodCommand {
            service_name: service_name.to_string(),
            method_name: method_name.to_string(),
        };
        self.conn.call(command.to_string(), params).await
    }

    /// Like [`Client::call`], deserializing the result.
    pub async fn call_as<R: DeserializeOwned>(
        &self,
        service_name: &str,
        method_name: &str,
        params: Vec<Value>,
    ) -> Result<R, ClientError> {
        let result = self.call(service_name, method_name, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    // =========================================================================
    // Event listeners
    // =========================================================================

    /// Registers an event listener with the server and returns its key.
    ///
    /// The callback runs on the connection's read task; keep it short.
    /// The registration survives reconnects.
    pub async fn add_event_listener(
        &self,
        event_name: &str,
        info: Value,
        callback: EventCallback,
    ) -> Result<String, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let key = Uuid::new_v4().to_string();
        self.conn
            .call(
                SpecialCommand::AddEventListener.as_str().to_string(),
                vec![json!(key), json!(event_name), info.clone()],
            )
            .await?;
        self.conn.events().insert(key.clone(), event_name, info, callback);
        Ok(key)
    }

    /// Removes the event listener registered under `key`.
    pub async fn remove_event_listener(&self, key: &str) -> Result<(), ClientError> {
        self.conn.events().remove(key);
        self.conn
            .call(
                SpecialCommand::RemoveEventListener.as_str().to_string(),
                vec![json!(key)],
            )
            .await?;
        Ok(())
    }

    /// Emits an event to every listener of `event_name` whose info
    /// passes `info_filter`, across all connected clients.
    pub async fn emit<F>(
        &self,
        event_name: &str,
        info_filter: F,
        data: Value,
    ) -> Result<(), ClientError>
    where
        F: Fn(&Value) -> bool,
    {
        let infos: Vec<ListenerInfo> = {
            let result = self
                .conn
                .call(
                    SpecialCommand::GetEventListenerInfos.as_str().to_string(),
                    vec![json!(event_name)],
                )
                .await?;
            serde_json::from_value(result)?
        };

        let target_keys: Vec<String> = infos
            .into_iter()
            .filter(|item| info_filter(&item.info))
            .map(|item| item.key)
            .collect();

        self.conn
            .call(
                SpecialCommand::EmitEvent.as_str().to_string(),
                vec![json!(target_keys), data],
            )
            .await?;
        Ok(())
    }

    /// Subscribes to split-transfer progress telemetry.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<TransferProgress> {
        self.conn.subscribe_progress()
    }

    /// Subscribes to reload pushes addressed to this client.
    pub fn subscribe_reloads(&self) -> broadcast::Receiver<ReloadNotice> {
        self.conn.subscribe_reloads()
    }
}

#[derive(serde::Deserialize)]
struct ListenerInfo {
    key: String,
    info: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_cloneable_and_shares_connection() {
        let config = ConnectionConfig::new("127.0.0.1:7718".parse().unwrap(), "studio");
        let client = Client::new(config);
        let clone = client.clone();
        assert!(Arc::ptr_eq(&client.connection(), &clone.connection()));
    }

    #[tokio::test]
    async fn test_add_listener_requires_connection() {
        let config = ConnectionConfig::new("127.0.0.1:7718".parse().unwrap(), "studio")
            .without_reconnect();
        let client = Client::new(config);

        let result = client
            .add_event_listener("DataChanged", json!({}), Arc::new(|_| {}))
            .await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }
}
