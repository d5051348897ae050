//! Codec error types.

use thiserror::Error;

/// Structured failure reported back through the codec bridge.
///
/// Every job gets exactly one reply: a result or one of these. Nothing
/// is silently dropped.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("encode failed: {message}")]
    Encode {
        message: String,
        detail: Option<String>,
    },

    #[error("decode failed: {message}")]
    Decode {
        message: String,
        detail: Option<String>,
    },

    #[error("codec worker stopped")]
    WorkerStopped,
}

impl CodecError {
    pub(crate) fn encode(err: impl std::fmt::Display) -> Self {
        Self::Encode {
            message: err.to_string(),
            detail: None,
        }
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: err.to_string(),
            detail: None,
        }
    }
}
