//! Session coordinator.
//!
//! Owns one [`Transport`] per signed-in user and folds its message stream into
//! a [`SessionState`] published through a `watch` channel. The application
//! root constructs one coordinator and hands it (or its receivers) to
//! whatever renders connection status and chat traffic.

use crate::config::ClientConfig;
use crate::connector::{Connector, WsConnector};
use crate::listeners::Subscription;
use crate::transport::Transport;
use crate::{ClientError, TransportError};
use sanskara_core::{validate, ConnectionState, MessageKind, VideoMode, WireMessage};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Everything the UI needs to know about the live session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub connection_state: ConnectionState,
    pub session_id: Option<String>,
    pub chat_session_id: Option<String>,
    pub is_recording: bool,
    pub is_assistant_speaking: bool,
    pub is_video_active: bool,
    pub active_video_mode: Option<VideoMode>,
    /// Conversation traffic, excluding `ready`/`reconnecting` signals.
    pub messages: Vec<WireMessage>,
}

impl SessionState {
    /// Fold one inbound message into the state.
    pub fn apply(&mut self, msg: &WireMessage) {
        match msg.kind {
            MessageKind::SessionId => {
                self.session_id = msg.data_str("session_id").map(str::to_string);
            }
            MessageKind::ChatSessionId => {
                self.chat_session_id = msg.data_str("chat_session_id").map(str::to_string);
            }
            MessageKind::Ready => self.connection_state = ConnectionState::Connected,
            MessageKind::Reconnecting => self.connection_state = ConnectionState::Reconnecting,
            MessageKind::Error => self.connection_state = ConnectionState::Error,
            MessageKind::Interrupted | MessageKind::TurnComplete => {
                self.is_recording = false;
                self.is_assistant_speaking = false;
            }
            MessageKind::Audio => self.is_assistant_speaking = true,
            MessageKind::Text | MessageKind::Video | MessageKind::Blob => {}
        }

        if !msg.kind.is_administrative() {
            self.messages.push(msg.clone());
        }
    }

    /// Drop session identity and activity flags, keeping the message list.
    fn reset_session(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
        self.session_id = None;
        self.chat_session_id = None;
        self.is_recording = false;
        self.is_assistant_speaking = false;
        self.is_video_active = false;
        self.active_video_mode = None;
    }
}

struct Service {
    transport: Transport,
    subscription: Subscription,
}

impl Service {
    fn dispose(self) {
        self.subscription.unsubscribe();
        self.transport.disconnect();
    }
}

pub struct Coordinator {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    service: Mutex<Option<Service>>,
    state: Arc<watch::Sender<SessionState>>,
}

impl Coordinator {
    /// Coordinator using the WebSocket connector configured from `config`.
    pub fn new(config: ClientConfig) -> Self {
        let connector = WsConnector::new().with_heartbeat(config.heartbeat_interval());
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            config,
            connector,
            service: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    fn lock_service(&self) -> MutexGuard<'_, Option<Service>> {
        self.service.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transport(&self) -> Result<Transport, ClientError> {
        self.lock_service()
            .as_ref()
            .map(|s| s.transport.clone())
            .ok_or(ClientError::NotInitialized)
    }

    /// Create the transport for `user_id`, replacing (and disconnecting) any
    /// previous one. `url` defaults to the configured WebSocket endpoint.
    pub fn initialize_service(&self, user_id: &str, url: Option<&str>) {
        let previous = self.lock_service().take();
        if let Some(previous) = previous {
            tracing::debug!("Disposing previous transport {}", previous.transport.url());
            previous.dispose();
        }

        let url = url.map(str::to_string).unwrap_or_else(|| self.config.ws_url());
        let transport = Transport::new(
            &url,
            user_id,
            self.config.transport_options(),
            self.connector.clone(),
        );

        let state = self.state.clone();
        let subscription = transport.subscribe(move |msg| state.send_modify(|s| s.apply(msg)));

        self.state.send_replace(SessionState::default());
        *self.lock_service() = Some(Service {
            transport,
            subscription,
        });
        tracing::info!("Chat service initialized for {}", user_id);
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        let transport = self.transport()?;
        self.state
            .send_modify(|s| s.connection_state = ConnectionState::Connecting);
        let result = transport.connect().await;
        self.settle_connection(&transport, result)
    }

    /// Publish the outcome of an explicit connect attempt.
    fn settle_connection(
        &self,
        transport: &Transport,
        result: Result<(), TransportError>,
    ) -> Result<(), ClientError> {
        match result {
            Ok(()) => {
                let current = transport.connection_state();
                self.state.send_modify(|s| s.connection_state = current);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Connection failed: {}", e);
                self.state
                    .send_modify(|s| s.connection_state = ConnectionState::Error);
                Err(e.into())
            }
        }
    }

    pub fn disconnect(&self) {
        if let Ok(transport) = self.transport() {
            transport.disconnect();
        }
        self.state.send_modify(SessionState::reset_session);
    }

    /// Reconnect now, bypassing backoff.
    pub async fn force_reconnect(&self) -> Result<(), ClientError> {
        let transport = self.transport()?;
        self.state
            .send_modify(|s| s.connection_state = ConnectionState::Connecting);
        let result = transport.force_reconnect().await;
        self.settle_connection(&transport, result)
    }

    /// Clear the conversation and start over on a fresh socket.
    pub async fn reset_session(&self) -> Result<(), ClientError> {
        self.clear_messages();
        self.force_reconnect().await
    }

    pub fn send_text(&self, text: &str) -> Result<(), ClientError> {
        let text = validate::text(text)
            .inspect_err(|e| tracing::warn!("Rejected text message: {}", e))?;
        let transport = self.transport()?;
        transport.send_text(text);
        self.state
            .send_modify(|s| s.messages.push(WireMessage::text(text)));
        Ok(())
    }

    pub fn send_audio(&self, bytes: &[u8]) -> Result<(), ClientError> {
        validate::audio(bytes).inspect_err(|e| tracing::warn!("Rejected audio chunk: {}", e))?;
        self.transport()?.send_audio(bytes);
        Ok(())
    }

    pub fn send_video(&self, frame: &str) -> Result<(), ClientError> {
        validate::video(frame).inspect_err(|e| tracing::warn!("Rejected video frame: {}", e))?;
        self.transport()?.send_video(frame);
        Ok(())
    }

    pub fn send_blob(&self, bytes: &[u8], mime: &str) -> Result<(), ClientError> {
        validate::blob(bytes, mime)
            .inspect_err(|e| tracing::warn!("Rejected file {}: {}", mime, e))?;
        self.transport()?.send_blob(bytes, mime);
        Ok(())
    }

    pub fn set_recording(&self, recording: bool) {
        self.state.send_modify(|s| s.is_recording = recording);
    }

    pub fn set_assistant_speaking(&self, speaking: bool) {
        self.state.send_modify(|s| s.is_assistant_speaking = speaking);
    }

    pub fn set_video_active(&self, active: bool, mode: Option<VideoMode>) {
        self.state.send_modify(|s| {
            s.is_video_active = active;
            s.active_video_mode = mode;
        });
    }

    pub fn clear_messages(&self) {
        self.state.send_modify(|s| s.messages.clear());
    }

    /// Listen to raw traffic from the current transport, server messages and
    /// lifecycle signals alike. The listener goes away with the transport
    /// when the service is re-initialized.
    pub fn subscribe<F>(&self, callback: F) -> Result<Subscription, ClientError>
    where
        F: Fn(&WireMessage) + Send + Sync + 'static,
    {
        Ok(self.transport()?.subscribe(callback))
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connection_state == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.transport().map(|t| t.reconnect_attempts()).unwrap_or(0)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let service = self
            .service
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(service) = service {
            service.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryConnector, Outcome};
    use std::time::Duration;

    fn coordinator(connector: &Arc<MemoryConnector>) -> Coordinator {
        let c = Coordinator::with_connector(ClientConfig::default(), connector.clone());
        c.initialize_service("u1", Some("ws://test/ws"));
        c
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn apply_state_table() {
        let mut s = SessionState::default();
        s.is_recording = true;

        s.apply(&WireMessage::audio(b"pcm"));
        assert!(s.is_assistant_speaking);

        s.apply(&WireMessage::signal(MessageKind::TurnComplete));
        assert!(!s.is_assistant_speaking);
        assert!(!s.is_recording);

        s.apply(&WireMessage::reconnecting());
        assert_eq!(s.connection_state, ConnectionState::Reconnecting);
        s.apply(&WireMessage::ready());
        assert_eq!(s.connection_state, ConnectionState::Connected);
        s.apply(&WireMessage::error("x"));
        assert_eq!(s.connection_state, ConnectionState::Error);

        let kinds: Vec<_> = s.messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::Audio, MessageKind::TurnComplete, MessageKind::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_frame_scenario() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);

        c.connect().await.unwrap();
        let peer = peers.recv().await.unwrap();
        peer.push(r#"{"type":"session_id","data":{"session_id":"s1"}}{"type":"ready"}"#);
        settle().await;

        let state = c.state();
        assert_eq!(state.session_id.as_deref(), Some("s1"));
        assert_eq!(state.connection_state, ConnectionState::Connected);
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_session_id_and_interrupt() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        let peer = peers.recv().await.unwrap();

        c.set_recording(true);
        peer.push(r#"{"type":"chat_session_id","data":{"chat_session_id":"c1"}}"#);
        peer.push(r#"{"type":"audio","data":"AAAA"}"#);
        settle().await;
        assert!(c.state().is_assistant_speaking);

        peer.push(r#"{"type":"interrupted"}"#);
        settle().await;
        let state = c.state();
        assert_eq!(state.chat_session_id.as_deref(), Some("c1"));
        assert!(!state.is_assistant_speaking);
        assert!(!state.is_recording);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_never_reaches_the_socket() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        assert!(matches!(c.send_text(""), Err(ClientError::Validation(_))));
        assert!(matches!(c.send_text(&"x".repeat(10_001)), Err(ClientError::Validation(_))));
        assert!(c.send_audio(&[]).is_err());
        assert!(c.send_video("").is_err());
        assert!(c.send_blob(b"PK", "application/zip").is_err());
        settle().await;

        assert!(peer.sent.try_recv().is_err());
        assert!(c.state().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn valid_text_is_trimmed_sent_and_echoed() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        c.send_text("  find me a venue ").unwrap();
        c.send_blob(b"{}", "application/json").unwrap();

        assert_eq!(peer.next_sent().await, WireMessage::text("find me a venue"));
        assert_eq!(peer.next_sent().await, WireMessage::blob(b"{}", "application/json"));
        assert_eq!(c.state().messages, vec![WireMessage::text("find me a venue")]);
    }

    #[tokio::test(start_paused = true)]
    async fn requires_initialization() {
        let (connector, _peers) = MemoryConnector::new();
        let c = Coordinator::with_connector(ClientConfig::default(), connector);
        assert!(matches!(c.connect().await, Err(ClientError::NotInitialized)));
        assert!(matches!(c.send_text("hi"), Err(ClientError::NotInitialized)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_sets_error() {
        let (connector, _peers) = MemoryConnector::new();
        connector.script([Outcome::Refuse]);
        let c = coordinator(&connector);

        assert!(c.connect().await.is_err());
        assert_eq!(c.state().connection_state, ConnectionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn reinitialize_disposes_previous_transport() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        let old_peer = peers.recv().await.unwrap();
        let old = c.transport().unwrap();
        assert_eq!(old.subscriber_count(), 1);

        c.initialize_service("u2", Some("ws://test/ws"));
        assert_eq!(old.subscriber_count(), 0);
        assert!(!old.is_connected());

        old_peer.push(r#"{"type":"session_id","data":"stale"}"#);
        settle().await;
        assert_eq!(c.state(), SessionState::default());
        assert_eq!(c.transport().unwrap().subscriber_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_resets_session() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        let peer = peers.recv().await.unwrap();
        peer.push(r#"{"type":"session_id","data":{"session_id":"s1"}}"#);
        settle().await;
        c.set_video_active(true, Some(VideoMode::Screen));

        c.disconnect();
        let state = c.state();
        assert_eq!(state.connection_state, ConnectionState::Disconnected);
        assert_eq!(state.session_id, None);
        assert!(!state.is_video_active);
        assert_eq!(state.active_video_mode, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_signals_flow_into_state() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        let mut rx = c.watch();
        c.connect().await.unwrap();

        drop(peers.recv().await.unwrap());
        settle().await;
        assert_eq!(c.state().connection_state, ConnectionState::Reconnecting);
        assert_eq!(c.reconnect_attempts(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().connection_state, ConnectionState::Connected);
        // Administrative signals are not part of the conversation.
        assert!(c.state().messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_force_reconnect_sets_error() {
        let (connector, _peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        assert_eq!(c.state().connection_state, ConnectionState::Connected);

        connector.script([Outcome::Refuse]);
        assert!(matches!(c.force_reconnect().await, Err(ClientError::Transport(_))));
        assert_eq!(c.state().connection_state, ConnectionState::Error);

        assert!(c.reset_session().await.is_ok());
        assert_eq!(c.state().connection_state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_session_clears_and_reconnects() {
        let (connector, mut peers) = MemoryConnector::new();
        let c = coordinator(&connector);
        c.connect().await.unwrap();
        let peer = peers.recv().await.unwrap();
        peer.push(r#"{"type":"text","data":"hello"}"#);
        settle().await;
        assert_eq!(c.state().messages.len(), 1);

        c.reset_session().await.unwrap();
        assert!(c.state().messages.is_empty());
        assert_eq!(connector.attempts(), 2);
        assert_eq!(c.state().connection_state, ConnectionState::Connected);
    }
}
