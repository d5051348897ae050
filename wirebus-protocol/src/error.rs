//! Protocol error types.

use thiserror::Error;
use uuid::Uuid;

/// Protocol-level errors that can occur during framing, splitting or
/// message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'WBUS', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("invalid frame flags: {0:#x}")]
    InvalidFlags(u16),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("split size mismatch for {uuid}: first fragment declared {declared}, got {got}")]
    SizeMismatch {
        uuid: Uuid,
        declared: u64,
        got: u64,
    },

    #[error("malformed command: {0:?}")]
    MalformedCommand(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error codes carried in error response bodies.
///
/// These strings are part of the protocol contract and must remain
/// stable across versions.
pub mod codes {
    pub const MALFORMED_COMMAND: &str = "MALFORMED_COMMAND";
    pub const UNKNOWN_SERVICE: &str = "UNKNOWN_SERVICE";
    pub const UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";
    pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
    pub const CODEC_ERROR: &str = "CODEC_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(*b"XXXX");
        assert!(err.to_string().contains("magic"));

        let err = ProtocolError::UnsupportedVersion(99);
        assert!(err.to_string().contains("99"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::CrcMismatch {
            expected: 0xABC,
            actual: 0xDEF,
        };
        let msg = err.to_string();
        assert!(msg.contains("abc") || msg.contains("ABC"));

        let err = ProtocolError::InvalidChunkSize(0);
        assert!(err.to_string().contains("chunk size"));

        let err = ProtocolError::MalformedCommand("Foo".to_string());
        assert!(err.to_string().contains("Foo"));
    }
}
