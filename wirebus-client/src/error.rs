//! Client error types.

use thiserror::Error;
use wirebus_protocol::ErrorBody;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] wirebus_protocol::ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] wirebus_codec::CodecError),

    #[error("not connected to server, check network")]
    NotConnected,

    #[error("connection lost")]
    ConnectionLost,

    #[error("request timeout")]
    Timeout,

    #[error("server error: {0}")]
    Server(ErrorBody),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::ConnectionLost
                | ClientError::NotConnected
        )
    }
}
