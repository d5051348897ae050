//! The tagged message union exchanged between client and server.
//!
//! Every payload on the wire is one of these variants, discriminated by
//! the `name` field. Fields serialize in camelCase to stay compatible
//! with existing peers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Terminal state of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseState {
    Success,
    Error,
}

/// Error detail carried in `response.body` when `state == "error"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error message.
    pub message: String,

    /// Stable error code (see [`crate::error::codes`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Origin-side backtrace, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} - {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A wirebus protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Message {
    /// Server-to-client: asks the client to identify itself.
    #[serde(rename = "client-get-id")]
    ClientGetId,

    /// Client-to-server: the client's stable identifier.
    #[serde(rename = "client-get-id-response")]
    ClientGetIdResponse { body: String },

    /// Server-to-client: handshake complete, requests may flow.
    #[serde(rename = "connected")]
    Connected,

    /// Out-of-band push telling a named client to reload changed files.
    #[serde(rename = "client-reload", rename_all = "camelCase")]
    ClientReload {
        client_name: Option<String>,
        changed_file_set: BTreeSet<String>,
    },

    /// A call: `command` is a `Service.Method` string, `uuid` correlates
    /// the eventual response.
    #[serde(rename = "request", rename_all = "camelCase")]
    Request {
        client_name: String,
        uuid: Uuid,
        command: String,
        params: Vec<Value>,
    },

    /// One ordered fragment of an oversized request.
    #[serde(rename = "request-split", rename_all = "camelCase")]
    RequestSplit {
        uuid: Uuid,
        full_size: u64,
        index: u32,
        body: String,
    },

    /// Terminal reply to exactly one request.
    #[serde(rename = "response", rename_all = "camelCase")]
    Response {
        req_uuid: Uuid,
        state: ResponseState,
        body: Value,
    },

    /// Progress acknowledgement while a split request is reassembling.
    #[serde(rename = "response-for-split", rename_all = "camelCase")]
    ResponseForSplit { req_uuid: Uuid, completed_size: u64 },

    /// One ordered fragment of an oversized response.
    #[serde(rename = "response-split", rename_all = "camelCase")]
    ResponseSplit {
        req_uuid: Uuid,
        full_size: u64,
        index: u32,
        body: String,
    },

    /// Server-pushed, key-addressed notification.
    #[serde(rename = "event")]
    Event { key: String, body: Value },
}

impl Message {
    /// Builds a success response for `req_uuid`.
    pub fn success(req_uuid: Uuid, body: Value) -> Self {
        Message::Response {
            req_uuid,
            state: ResponseState::Success,
            body,
        }
    }

    /// Builds an error response for `req_uuid`, embedding the error detail.
    pub fn error(req_uuid: Uuid, error: ErrorBody) -> Self {
        Message::Response {
            req_uuid,
            state: ResponseState::Error,
            // ErrorBody serialization cannot fail: strings and options only.
            body: serde_json::to_value(error).unwrap_or(Value::Null),
        }
    }

    /// The wire discriminator for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClientGetId => "client-get-id",
            Message::ClientGetIdResponse { .. } => "client-get-id-response",
            Message::Connected => "connected",
            Message::ClientReload { .. } => "client-reload",
            Message::Request { .. } => "request",
            Message::RequestSplit { .. } => "request-split",
            Message::Response { .. } => "response",
            Message::ResponseForSplit { .. } => "response-for-split",
            Message::ResponseSplit { .. } => "response-split",
            Message::Event { .. } => "event",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let msg = Message::Request {
            client_name: "studio".to_string(),
            uuid: Uuid::new_v4(),
            command: "FileService.readDir".to_string(),
            params: vec![json!("/tmp")],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""name":"request""#));
        assert!(json.contains(r#""clientName":"studio""#));
        assert!(json.contains(r#""command":"FileService.readDir""#));
    }

    #[test]
    fn test_response_states() {
        let uuid = Uuid::new_v4();
        let ok = Message::success(uuid, json!({"done": true}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""state":"success""#));
        assert!(json.contains(r#""reqUuid""#));

        let err = Message::error(uuid, ErrorBody::new("boom").with_code("HANDLER_ERROR"));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""state":"error""#));
        assert!(json.contains(r#""code":"HANDLER_ERROR""#));
    }

    #[test]
    fn test_split_field_names() {
        let msg = Message::RequestSplit {
            uuid: Uuid::new_v4(),
            full_size: 9,
            index: 0,
            body: "abc".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""name":"request-split""#));
        assert!(json.contains(r#""fullSize":9"#));
        assert!(json.contains(r#""index":0"#));
    }

    #[test]
    fn test_roundtrip_all_variants() {
        let msgs = vec![
            Message::ClientGetId,
            Message::ClientGetIdResponse {
                body: "abc".to_string(),
            },
            Message::Connected,
            Message::ClientReload {
                client_name: Some("studio".to_string()),
                changed_file_set: ["a.css".to_string()].into_iter().collect(),
            },
            Message::Request {
                client_name: "studio".to_string(),
                uuid: Uuid::new_v4(),
                command: "A.b".to_string(),
                params: vec![],
            },
            Message::RequestSplit {
                uuid: Uuid::new_v4(),
                full_size: 10,
                index: 1,
                body: "x".to_string(),
            },
            Message::success(Uuid::new_v4(), json!(42)),
            Message::ResponseForSplit {
                req_uuid: Uuid::new_v4(),
                completed_size: 3,
            },
            Message::ResponseSplit {
                req_uuid: Uuid::new_v4(),
                full_size: 10,
                index: 0,
                body: "y".to_string(),
            },
            Message::Event {
                key: "k1".to_string(),
                body: json!({"n": 1}),
            },
        ];

        for msg in msgs {
            let kind = msg.kind();
            let json = serde_json::to_string(&msg).unwrap();
            assert!(json.contains(&format!(r#""name":"{}""#, kind)));
            let back: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(back.kind(), kind);
        }
    }

    #[test]
    fn test_error_body_display() {
        let body = ErrorBody::new("no such file").with_code("HANDLER_ERROR");
        assert_eq!(body.to_string(), "HANDLER_ERROR - no such file");

        let plain = ErrorBody::new("no such file");
        assert_eq!(plain.to_string(), "no such file");
    }

    #[test]
    fn test_error_body_roundtrip_through_response() {
        let uuid = Uuid::new_v4();
        let msg = Message::error(uuid, ErrorBody::new("bad").with_stack("at foo"));
        if let Message::Response { state, body, .. } = msg {
            assert_eq!(state, ResponseState::Error);
            let parsed: ErrorBody = serde_json::from_value(body).unwrap();
            assert_eq!(parsed.message, "bad");
            assert_eq!(parsed.stack.as_deref(), Some("at foo"));
        } else {
            panic!("expected response variant");
        }
    }
}
