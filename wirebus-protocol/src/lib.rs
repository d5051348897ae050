//! # wirebus-protocol
//!
//! Wire protocol implementation for wirebus.
//!
//! This crate provides:
//! - Binary framing with length prefix and CRC32C validation
//! - The tagged message union exchanged between client and server
//! - Split-message chunking and out-of-order reassembly
//! - Command string parsing and protocol constants

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod message;
pub mod split;

pub use codec::{Decoder, Encoder};
pub use command::{MethodCommand, SpecialCommand};
pub use error::ProtocolError;
pub use frame::{Frame, FrameFlags, FRAME_HEADER_SIZE, MAGIC};
pub use message::{ErrorBody, Message, ResponseState};
pub use split::{SplitAccumulator, SplitProgress};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for wirebus servers.
pub const DEFAULT_PORT: u16 = 7718;

/// Encoded messages above this size are chunked into split fragments
/// (3 MiB). Must match across implementations.
pub const MAX_MESSAGE_SIZE: usize = 3 * 1024 * 1024;

/// Byte size of each split fragment body (300 KiB). Must match across
/// implementations.
pub const SPLIT_CHUNK_SIZE: usize = 300 * 1024;

/// Hard cap on a single logical message, split or not (100 MiB).
pub const MAX_ENCODED_SIZE: usize = 100 * 1024 * 1024;

/// Maximum frame payload size (4 MiB). An unsplit message plus its
/// envelope always fits; split fragments are far below this.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
