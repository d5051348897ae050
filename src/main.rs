//! wirebus - service messaging bus
//!
//! Multiplexes RPC calls and server-pushed events over one persistent
//! framed connection per client.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wirebus_server::{tls, Config, Server, ServerConfig, ServiceRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if WIREBUS_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("WIREBUS_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("WIREBUS_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting wirebus server");
    tracing::info!("  Protocol version: {}", wirebus_protocol::PROTOCOL_VERSION);
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!(
        "  Split accumulator TTL: {}s",
        config.protocol.accumulator_ttl_secs
    );

    // Validate and log TLS config
    if let Err(e) = config.tls.validate() {
        tracing::error!("TLS configuration error: {}", e);
        return Err(e.into());
    }

    let mut server_config = ServerConfig::from_config(&config);
    if config.tls.enabled {
        let acceptor = tls::create_tls_acceptor(&config.tls)?;
        server_config = server_config.with_tls(acceptor);
        tracing::info!("  TLS: enabled");
    } else {
        tracing::info!("  TLS: disabled");
    }

    // Services are registered by embedders; the standalone binary
    // serves the event multiplexer surface only.
    let services = ServiceRegistry::new();
    let server = Arc::new(Server::new(server_config, services));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
