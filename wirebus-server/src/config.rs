//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via WIREBUS_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Protocol timings.
    pub protocol: ProtocolConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("WIREBUS_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.protocol.apply_env_overrides();
        self.tls.apply_env_overrides();
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Keepalive ping interval in seconds.
    pub keepalive_secs: u64,
    /// How long the get-id handshake may take, in seconds.
    pub handshake_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", wirebus_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            max_connections: 1000,
            keepalive_secs: 10,
            handshake_timeout_secs: 10,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("WIREBUS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Ok(max) = std::env::var("WIREBUS_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
        if let Ok(secs) = std::env::var("WIREBUS_KEEPALIVE_SECS") {
            if let Ok(n) = secs.parse() {
                self.keepalive_secs = n;
            }
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Protocol timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Idle TTL for abandoned split-transfer buffers, in seconds.
    pub accumulator_ttl_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            accumulator_ttl_secs: 60,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(secs) = std::env::var("WIREBUS_ACCUMULATOR_TTL_SECS") {
            if let Ok(n) = secs.parse() {
                self.accumulator_ttl_secs = n;
            }
        }
    }

    pub fn accumulator_ttl(&self) -> Duration {
        Duration::from_secs(self.accumulator_ttl_secs)
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded server certificate chain.
    pub cert_path: Option<PathBuf>,
    /// Path to PEM-encoded server private key.
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("WIREBUS_TLS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(path) = std::env::var("WIREBUS_TLS_CERT") {
            self.cert_path = Some(path.into());
        }
        if let Ok(path) = std::env::var("WIREBUS_TLS_KEY") {
            self.key_path = Some(path.into());
        }
    }

    /// Checks that enabled TLS names both certificate and key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && (self.cert_path.is_none() || self.key_path.is_none()) {
            return Err(ConfigError::Invalid(
                "tls.enabled requires tls.cert_path and tls.key_path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("cannot parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
