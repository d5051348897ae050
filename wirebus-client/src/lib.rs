//! # wirebus-client
//!
//! Client library for wirebus.
//!
//! This crate provides:
//! - Connection management with automatic reconnection
//! - Concurrent call correlation over one framed stream
//! - Key-addressed event subscriptions with re-registration on reconnect
//! - Transfer progress and reload notifications
//! - Optional TLS support

pub mod client;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod events;
pub mod reconnect;
pub mod stream;
pub mod tls;

pub use client::Client;
pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, ReloadNotice, TlsClientConfig,
    TransferProgress,
};
pub use error::ClientError;
pub use reconnect::{DefaultReconnectStrategy, ReconnectStrategy};
