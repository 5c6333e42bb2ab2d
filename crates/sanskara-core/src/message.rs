//! Protocol messages.
//!
//! Every frame on the socket carries one or more `{ type, data?, mime? }`
//! envelopes. The same envelope is used for lifecycle signals the client
//! synthesizes itself (`ready`, `reconnecting`, `error`).

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The `type` tag of a [`WireMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    Video,
    Blob,
    SessionId,
    ChatSessionId,
    Ready,
    Error,
    Interrupted,
    TurnComplete,
    Reconnecting,
}

impl MessageKind {
    /// Lifecycle signals that carry no conversation content.
    pub fn is_administrative(self) -> bool {
        matches!(self, MessageKind::Ready | MessageKind::Reconnecting)
    }
}

/// Envelope exchanged over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl WireMessage {
    /// A message with no payload.
    pub fn signal(kind: MessageKind) -> Self {
        Self {
            kind,
            data: None,
            mime: None,
        }
    }

    pub fn with_data(kind: MessageKind, data: Value) -> Self {
        Self {
            kind,
            data: Some(data),
            mime: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_data(MessageKind::Text, Value::String(text.into()))
    }

    /// Audio chunk, base64 encoded.
    pub fn audio(bytes: &[u8]) -> Self {
        Self::with_data(MessageKind::Audio, Value::String(BASE64_STANDARD.encode(bytes)))
    }

    /// Video frame, already base64 encoded by the capture side.
    pub fn video(frame: impl Into<String>) -> Self {
        Self::with_data(MessageKind::Video, Value::String(frame.into()))
    }

    /// File upload, base64 encoded, tagged with its MIME type.
    pub fn blob(bytes: &[u8], mime: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Blob,
            data: Some(Value::String(BASE64_STANDARD.encode(bytes))),
            mime: Some(mime.into()),
        }
    }

    pub fn ready() -> Self {
        Self::signal(MessageKind::Ready)
    }

    pub fn reconnecting() -> Self {
        Self::signal(MessageKind::Reconnecting)
    }

    /// Error signal in the `{ "error": "..." }` shape the server uses.
    pub fn error(cause: impl Into<String>) -> Self {
        Self::with_data(MessageKind::Error, json!({ "error": cause.into() }))
    }

    /// Look up a string field in `data`.
    ///
    /// Accepts either `{ "<field>": "..." }` or a bare string payload, since
    /// the server has sent both shapes for session identifiers.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        match self.data.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get(field).and_then(Value::as_str),
            _ => None,
        }
    }

    /// Human-readable error cause, if this is an error signal.
    pub fn error_cause(&self) -> Option<&str> {
        if self.kind != MessageKind::Error {
            return None;
        }
        self.data_str("error")
            .or_else(|| self.data.as_ref()?.get("message")?.as_str())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
