//! Split-aware message encoding and decoding.
//!
//! Whole-message size, not fragment count, decides splitting: the
//! message is serialized first, and only when the encoded text exceeds
//! [`MAX_MESSAGE_SIZE`] is it cut into `request-split` /
//! `response-split` envelopes of [`SPLIT_CHUNK_SIZE`] bytes each. Small
//! messages pay no chunking overhead.

use bytes::Bytes;
use wirebus_protocol::split::split_message;
use wirebus_protocol::{
    Message, ProtocolError, MAX_ENCODED_SIZE, MAX_MESSAGE_SIZE, SPLIT_CHUNK_SIZE,
};

/// Result of encoding one logical message.
#[derive(Debug)]
pub struct EncodedMessage {
    /// Serialized wire payloads, to be framed and sent in order. One
    /// entry for an unsplit message, several for a chunked one. `Bytes`
    /// hand across thread boundaries by reference count, not by copy.
    pub chunks: Vec<Bytes>,

    /// Byte length of the serialized logical message (the `fullSize`
    /// declared by split fragments).
    pub total_size: u64,
}

impl EncodedMessage {
    /// Whether the message was chunked.
    pub fn is_split(&self) -> bool {
        self.chunks.len() > 1
    }
}

/// Serializes a message, splitting it when the encoded size exceeds the
/// threshold.
///
/// Only `request` and `response` messages can be split (they carry the
/// correlation uuid the receiver reassembles by); any other kind over
/// the threshold is an error, as is anything over [`MAX_ENCODED_SIZE`].
pub fn encode_message(message: &Message) -> Result<EncodedMessage, ProtocolError> {
    let text = serde_json::to_string(message)?;

    if text.len() > MAX_ENCODED_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: MAX_ENCODED_SIZE,
        });
    }

    if text.len() <= MAX_MESSAGE_SIZE {
        let total_size = text.len() as u64;
        return Ok(EncodedMessage {
            chunks: vec![Bytes::from(text)],
            total_size,
        });
    }

    let full_size = text.len() as u64;
    let bodies = split_message(&text, SPLIT_CHUNK_SIZE)?;

    let chunks = match message {
        Message::Request { uuid, .. } => {
            let uuid = *uuid;
            bodies
                .into_iter()
                .enumerate()
                .map(|(index, body)| {
                    fragment_bytes(&Message::RequestSplit {
                        uuid,
                        full_size,
                        index: index as u32,
                        body,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        Message::Response { req_uuid, .. } => {
            let req_uuid = *req_uuid;
            bodies
                .into_iter()
                .enumerate()
                .map(|(index, body)| {
                    fragment_bytes(&Message::ResponseSplit {
                        req_uuid,
                        full_size,
                        index: index as u32,
                        body,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        }
        _ => {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            })
        }
    };

    Ok(EncodedMessage {
        chunks,
        total_size: full_size,
    })
}

fn fragment_bytes(fragment: &Message) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(fragment)?))
}

/// Deserializes raw payload bytes into a message.
pub fn decode_message(data: &[u8]) -> Result<Message, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(serde_json::from_str(text)?)
}
