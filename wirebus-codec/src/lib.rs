//! # wirebus-codec
//!
//! Codec worker bridge for wirebus.
//!
//! This crate provides:
//! - Synchronous, split-aware message encode/decode
//! - A [`CodecWorker`] that runs the same functions on a dedicated
//!   thread, keeping serialization cost off the connection task
//!
//! The worker is purely a performance measure: both paths share one code
//! path and have identical observable behavior.

pub mod codec;
pub mod error;
pub mod worker;

pub use codec::{decode_message, encode_message, EncodedMessage};
pub use error::CodecError;
pub use worker::CodecWorker;
