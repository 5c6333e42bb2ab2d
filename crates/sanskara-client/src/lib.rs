//! Realtime client for the Sanskara planning assistant.
//!
//! Layers, bottom up:
//!
//! - [`Connector`]: opens one socket ([`WsConnector`] over tokio-tungstenite).
//! - [`Transport`]: a single reconnecting socket with an outbound queue and
//!   exponential backoff.
//! - [`Coordinator`]: owns the transport for the signed-in user and folds
//!   traffic into a watchable [`SessionState`].
//! - [`MessageStore`]: the chat log, including streamed assistant replies and
//!   paginated history from [`HttpHistoryClient`].

pub mod config;
mod connector;
mod coordinator;
mod error;
pub mod history;
mod listeners;
mod store;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{load_config, ClientConfig};
pub use connector::{Connector, Link, LinkEvent, WsConnector};
pub use coordinator::{Coordinator, SessionState};
pub use error::{ClientError, HistoryError, HttpErrorKind, TransportError};
pub use history::{HistoryQuery, HistorySource, HttpHistoryClient};
pub use listeners::Subscription;
pub use store::{HistoryRequest, MessageStore, StoreEvent};
pub use transport::{socket_url, Transport, TransportOptions};

pub use sanskara_core::{
    ChatMessage, ConnectionState, HistoryEventType, HistoryPage, MessageKind, Role, VideoMode,
    WireMessage,
};
