//! # wirebus-server
//!
//! Server side of the wirebus messaging protocol.
//!
//! This crate provides:
//! - TCP connection handling with async I/O and optional TLS
//! - The get-id handshake and per-connection session loop
//! - Command routing to registered services
//! - The event multiplexer (listener registry, emit, reload broadcast)
//! - YAML configuration with environment overrides

pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;
pub mod service;
pub mod stream;
pub mod tls;

pub use config::{Config, NetworkConfig, ProtocolConfig, TlsConfig};
pub use connection::ConnectionSettings;
pub use error::ServerError;
pub use registry::{ClientHandle, ClientRegistry, ListenerInfo};
pub use router::CommandRouter;
pub use server::{Server, ServerConfig, ServerStats};
pub use service::{Service, ServiceError, ServiceFuture, ServiceRegistry};
