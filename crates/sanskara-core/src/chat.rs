//! Chat log entries and the history API's wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Who authored a chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Bot,
    System,
}

impl Role {
    /// Map a sender label from the backend. Anything that is not the user or
    /// a system event is treated as the assistant.
    pub fn from_sender(sender: &str) -> Self {
        match sender {
            "user" | "human" => Role::User,
            "system" => Role::System,
            _ => Role::Bot,
        }
    }
}

/// A visible chat log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_streaming: bool,
    /// Backfilled from the history API rather than received live.
    #[serde(default)]
    pub from_history: bool,
}

impl ChatMessage {
    /// A fresh entry with a random id and the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_streaming: false,
            from_history: false,
        }
    }
}

/// One page of `GET /sessions/{id}/history`, newest event first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub events: Vec<HistoryEvent>,
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEvent {
    pub metadata: HistoryMetadata,
    #[serde(default)]
    pub content: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMetadata {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub event_type: HistoryEventType,
    #[serde(default)]
    pub wedding_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventType {
    Message,
    ArtifactUpload,
    SystemEvent,
}

impl HistoryEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryEventType::Message => "message",
            HistoryEventType::ArtifactUpload => "artifact_upload",
            HistoryEventType::SystemEvent => "system_event",
        }
    }
}

fn probe<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_str))
}

impl HistoryEvent {
    /// Convert to a log entry, probing the field names the backend has used
    /// over time.
    pub fn into_chat_message(self) -> ChatMessage {
        let content = &self.content;
        let (role, text) = match self.metadata.event_type {
            HistoryEventType::Message => (
                Role::from_sender(probe(content, &["sender", "role"]).unwrap_or("assistant")),
                probe(content, &["content", "text", "message"]).unwrap_or_default().to_string(),
            ),
            HistoryEventType::ArtifactUpload => (
                Role::System,
                format!(
                    "Uploaded {}",
                    probe(content, &["filename", "file_url"]).unwrap_or("a file")
                ),
            ),
            HistoryEventType::SystemEvent => (
                Role::System,
                probe(content, &["event_name"]).unwrap_or("system event").to_string(),
            ),
        };

        ChatMessage {
            id: probe(content, &["message_id", "artifact_id", "id"])
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            role,
            content: text,
            timestamp: self.metadata.timestamp.unwrap_or_else(Utc::now),
            is_streaming: false,
            from_history: true,
        }
    }
}
