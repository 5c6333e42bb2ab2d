//! Core types for the Sanskara live chat protocol.
//!
//! This crate holds the protocol primitives and has no I/O: the wire envelope,
//! chat log entries, the history API's shapes, frame splitting, and the limits
//! applied to outbound payloads.

mod chat;
mod frame;
mod message;
pub mod validate;

pub use chat::{ChatMessage, HistoryEvent, HistoryEventType, HistoryMetadata, HistoryPage, Role};
pub use frame::{parse_frame, split_objects, FrameError};
pub use message::{MessageKind, WireMessage};
pub use validate::ValidationError;

use serde::{Deserialize, Serialize};

/// Connection lifecycle state as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket, nothing scheduled.
    #[default]
    Disconnected,
    /// Opening a socket.
    Connecting,
    /// Socket open and usable.
    Connected,
    /// Waiting to retry after an unclean close.
    Reconnecting,
    /// Retries exhausted or connect failed; needs a manual reconnect.
    Error,
}

/// Capture source for outbound video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoMode {
    Webcam,
    Screen,
}
