//! Server error types.

use thiserror::Error;

/// Server errors.
///
/// These cover infrastructure faults only; handler and command failures
/// are converted into error responses by the router and never surface
/// here.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] wirebus_protocol::ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] wirebus_codec::CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("connection terminated: superseded by a newer connection with the same client id")]
    Superseded,

    #[error("keepalive expired")]
    KeepaliveExpired,

    #[error("server shutting down")]
    ShuttingDown,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}
