//! Encoder and decoder for framed messages on a byte stream.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::Message;
use bytes::{Bytes, BytesMut};

/// Encodes messages into frames.
pub struct Encoder;

impl Encoder {
    /// Wraps already-serialized message text in a frame.
    pub fn encode_payload(payload: Bytes) -> Result<BytesMut, ProtocolError> {
        Frame::new(payload).encode()
    }

    /// Serializes a message and wraps it in a frame.
    pub fn encode_message(message: &Message) -> Result<BytesMut, ProtocolError> {
        let payload = serde_json::to_vec(message)?;
        Frame::new(Bytes::from(payload)).encode()
    }
}

/// Buffered decoder turning a byte stream into frames and messages.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next message from the buffer, skipping
    /// keepalive control frames.
    pub fn decode_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        loop {
            match self.decode_frame()? {
                Some(frame) if frame.is_control() => continue,
                Some(frame) => {
                    let payload = std::str::from_utf8(&frame.payload)
                        .map_err(|_| ProtocolError::InvalidUtf8)?;
                    return Ok(Some(serde_json::from_str(payload)?));
                }
                None => return Ok(None),
            }
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let msg = Message::Event {
            key: "k1".to_string(),
            body: serde_json::json!({"n": 7}),
        };
        let encoded = Encoder::encode_message(&msg).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);

        let decoded = decoder.decode_message().unwrap().unwrap();
        match decoded {
            Message::Event { key, body } => {
                assert_eq!(key, "k1");
                assert_eq!(body["n"], 7);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_partial_frame_decoding() {
        let msg = Message::ClientGetIdResponse {
            body: Uuid::new_v4().to_string(),
        };
        let encoded = Encoder::encode_message(&msg).unwrap();

        let mut decoder = Decoder::new();

        decoder.extend(&encoded[..10]);
        assert!(decoder.decode_message().unwrap().is_none());

        decoder.extend(&encoded[10..]);
        let decoded = decoder.decode_message().unwrap().unwrap();
        assert_eq!(decoded.kind(), "client-get-id-response");
    }

    #[test]
    fn test_control_frames_skipped() {
        let mut decoder = Decoder::new();
        decoder.extend(&Frame::ping().encode().unwrap());
        decoder.extend(&Encoder::encode_message(&Message::Connected).unwrap());

        let decoded = decoder.decode_message().unwrap().unwrap();
        assert_eq!(decoded.kind(), "connected");
    }

    #[test]
    fn test_decoder_buffered() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_messages_in_buffer() {
        let mut decoder = Decoder::new();
        decoder.extend(&Encoder::encode_message(&Message::ClientGetId).unwrap());
        decoder.extend(&Encoder::encode_message(&Message::Connected).unwrap());

        assert_eq!(decoder.decode_message().unwrap().unwrap().kind(), "client-get-id");
        assert_eq!(decoder.decode_message().unwrap().unwrap().kind(), "connected");
        assert!(decoder.decode_message().unwrap().is_none());
    }
}
