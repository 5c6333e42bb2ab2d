//! Reconnecting transport.
//!
//! Owns at most one socket at a time. Messages sent while the socket is not
//! open are queued and flushed, in order, as soon as it opens. Unclean closes
//! trigger exponential-backoff reconnection; lifecycle changes are reported
//! to subscribers as synthetic [`WireMessage`]s on the same stream as
//! server traffic.
//!
//! All methods must be called from within a Tokio runtime.

use crate::connector::{Connector, Link, LinkEvent};
use crate::listeners::{Listeners, Subscription};
use crate::TransportError;
use sanskara_core::{parse_frame, ConnectionState, WireMessage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Retry and timeout knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Delay before the first reconnect attempt; doubles on each attempt.
    pub base_delay: Duration,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 3,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Link lifecycle.
#[derive(Debug)]
enum Phase {
    Idle,
    Connecting,
    Open { outgoing: mpsc::UnboundedSender<String> },
    Reconnecting,
    /// The last connect attempt failed; the next send retries.
    Failed,
    /// Reconnect attempts used up; only a forced reconnect retries.
    Exhausted,
}

struct PendingReconnect {
    delay: Duration,
    handle: JoinHandle<()>,
}

struct LinkState {
    phase: Phase,
    attempts: u32,
    queue: VecDeque<WireMessage>,
    timer: Option<PendingReconnect>,
    /// Bumped whenever a link is installed or torn down, so events from a
    /// superseded socket are ignored.
    generation: u64,
}

struct Shared {
    url: String,
    options: TransportOptions,
    connector: Arc<dyn Connector>,
    state: Mutex<LinkState>,
    subscribers: Listeners<WireMessage>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(timer) = st.timer.take() {
            timer.handle.abort();
        }
    }
}

/// Handle to a reconnecting socket. Clones share the same socket.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

/// `url` with the `user_id` query parameter appended.
pub fn socket_url(url: &str, user_id: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("user_id", user_id);
            parsed.to_string()
        }
        Err(_) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}{}", user_id_query(user_id))
        }
    }
}

/// `user_id=<form-encoded id>`, for URLs the parser rejects.
fn user_id_query(user_id: &str) -> String {
    reqwest::Url::parse_with_params("ws://localhost/", &[("user_id", user_id)])
        .ok()
        .and_then(|scratch| scratch.query().map(str::to_string))
        .unwrap_or_else(|| "user_id=".to_string())
}

impl Transport {
    pub fn new(
        url: &str,
        user_id: &str,
        options: TransportOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: socket_url(url, user_id),
                options,
                connector,
                state: Mutex::new(LinkState {
                    phase: Phase::Idle,
                    attempts: 0,
                    queue: VecDeque::new(),
                    timer: None,
                    generation: 0,
                }),
                subscribers: Listeners::new(),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Open the socket. Returns immediately if it is already open; concurrent
    /// callers wait for the attempt in flight instead of opening a second
    /// socket.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _guard = self.shared.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.open_link().await
    }

    /// Close the socket, cancel any pending reconnect and discard queued
    /// messages.
    pub fn disconnect(&self) {
        let mut st = self.shared.lock();
        if let Some(timer) = st.timer.take() {
            timer.handle.abort();
        }
        if !matches!(st.phase, Phase::Idle) || !st.queue.is_empty() {
            tracing::info!("Disconnecting from {}", self.shared.url);
        }
        st.phase = Phase::Idle;
        st.generation += 1;
        st.attempts = 0;
        st.queue.clear();
    }

    /// Tear down the socket and reconnect immediately with the attempt
    /// counter reset. Queued messages are kept and flushed on success.
    pub async fn force_reconnect(&self) -> Result<(), TransportError> {
        {
            let mut st = self.shared.lock();
            if let Some(timer) = st.timer.take() {
                timer.handle.abort();
            }
            st.phase = Phase::Idle;
            st.generation += 1;
            st.attempts = 0;
        }
        tracing::info!("Forcing reconnect to {}", self.shared.url);
        self.connect().await?;
        self.shared.subscribers.emit(&WireMessage::ready());
        Ok(())
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(WireMessage::text(text));
    }

    pub fn send_audio(&self, bytes: &[u8]) {
        self.send(WireMessage::audio(bytes));
    }

    pub fn send_video(&self, frame: impl Into<String>) {
        self.send(WireMessage::video(frame));
    }

    pub fn send_blob(&self, bytes: &[u8], mime: impl Into<String>) {
        self.send(WireMessage::blob(bytes, mime));
    }

    /// Send now if open, otherwise queue and make sure a reconnect is on its
    /// way.
    pub fn send(&self, msg: WireMessage) {
        let signal = {
            let mut st = self.shared.lock();
            if let Phase::Open { outgoing } = &st.phase {
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!("Dropping unencodable {:?} message: {}", msg.kind, e);
                        return;
                    }
                };
                if outgoing.send(json).is_ok() {
                    tracing::debug!("Sent {:?}", msg.kind);
                    return;
                }
                let err = TransportError::SendFailure("socket closed".into());
                tracing::warn!("{}; re-queueing {:?}", err, msg.kind);
                st.queue.push_front(msg);
                st.phase = Phase::Idle;
                self.schedule_reconnect(&mut st)
            } else {
                tracing::debug!("Not connected; queueing {:?}", msg.kind);
                st.queue.push_back(msg);
                // Connecting and Reconnecting already have an attempt on the
                // way; Exhausted waits for a forced reconnect.
                if matches!(st.phase, Phase::Idle | Phase::Failed) {
                    self.schedule_reconnect(&mut st)
                } else {
                    None
                }
            }
        };
        if let Some(signal) = signal {
            self.shared.subscribers.emit(&signal);
        }
    }

    /// Register a listener for every inbound and synthetic message.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WireMessage) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.len()
    }

    pub fn connection_state(&self) -> ConnectionState {
        match self.shared.lock().phase {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Open { .. } => ConnectionState::Connected,
            Phase::Reconnecting => ConnectionState::Reconnecting,
            Phase::Failed | Phase::Exhausted => ConnectionState::Error,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.shared.lock().phase, Phase::Open { .. })
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Delay of the reconnect timer currently pending, if any.
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.shared.lock().timer.as_ref().map(|t| t.delay)
    }

    /// Caller must hold `connect_lock`.
    async fn open_link(&self) -> Result<(), TransportError> {
        let generation = {
            let mut st = self.shared.lock();
            st.phase = Phase::Connecting;
            st.generation
        };
        tracing::info!("Connecting to {}", self.shared.url);

        let timeout = self.shared.options.connect_timeout;
        let attempt = self.shared.connector.connect(&self.shared.url);
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionTimeout(timeout)),
        };

        match result {
            Ok(link) => {
                if !self.install(generation, link) {
                    return Err(TransportError::ConnectionError(
                        "connection attempt cancelled by disconnect".into(),
                    ));
                }
                tracing::info!("Connected to {}", self.shared.url);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", self.shared.url, e);
                let mut st = self.shared.lock();
                if st.generation == generation {
                    st.phase = Phase::Failed;
                }
                Err(e)
            }
        }
    }

    /// Make `link` the live socket and flush the queue into it. Returns false,
    /// dropping the link, if a disconnect happened since `expected` was read.
    fn install(&self, expected: u64, link: Link) -> bool {
        let Link { outgoing, incoming } = link;
        let generation = {
            let mut st = self.shared.lock();
            if st.generation != expected {
                tracing::debug!("Discarding superseded connection to {}", self.shared.url);
                return false;
            }
            if let Some(timer) = st.timer.take() {
                timer.handle.abort();
            }
            st.generation += 1;
            st.attempts = 0;

            // Flush the backlog before anyone else can see the link open.
            while let Some(msg) = st.queue.pop_front() {
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!("Dropping unencodable {:?} message: {}", msg.kind, e);
                        continue;
                    }
                };
                if outgoing.send(json).is_err() {
                    // The reader will see the close and schedule a reconnect.
                    st.queue.push_front(msg);
                    break;
                }
                tracing::debug!("Flushed queued {:?}", msg.kind);
            }

            st.phase = Phase::Open { outgoing };
            st.generation
        };

        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(read_link(shared, generation, incoming));
        true
    }

    fn handle_frame(&self, generation: u64, frame: &str) {
        if self.shared.lock().generation != generation {
            return;
        }
        match parse_frame(frame) {
            Ok(messages) => {
                for msg in messages {
                    tracing::debug!("Received {:?}", msg.kind);
                    self.shared.subscribers.emit(&msg);
                }
            }
            Err(e) => tracing::warn!("Failed to parse frame: {}", e),
        }
    }

    fn handle_close(&self, generation: u64, clean: bool, reason: &str, unsent: Vec<String>) {
        let signal = {
            let mut st = self.shared.lock();
            if st.generation != generation {
                return;
            }
            // Frames the socket never wrote go back ahead of anything queued
            // since, in their original order.
            for frame in unsent.into_iter().rev() {
                match serde_json::from_str::<WireMessage>(&frame) {
                    Ok(msg) => {
                        tracing::debug!("Re-queueing unsent {:?}", msg.kind);
                        st.queue.push_front(msg);
                    }
                    Err(e) => tracing::warn!("Dropping unsent frame {}: {}", frame, e),
                }
            }
            if !matches!(st.phase, Phase::Open { .. }) {
                return;
            }
            st.phase = Phase::Idle;
            if clean {
                tracing::info!("Connection closed: {}", reason);
                return;
            }
            tracing::warn!("Connection dropped: {}", reason);
            self.schedule_reconnect(&mut st)
        };
        if let Some(signal) = signal {
            self.shared.subscribers.emit(&signal);
        }
    }

    /// Arm the reconnect timer unless one is pending. Returns the signal to
    /// emit once the state lock is released.
    fn schedule_reconnect(&self, st: &mut LinkState) -> Option<WireMessage> {
        if st.timer.is_some() {
            return None;
        }

        let max = self.shared.options.max_attempts;
        if st.attempts >= max {
            st.phase = Phase::Exhausted;
            tracing::error!(
                "Giving up on {} after {} reconnect attempts",
                self.shared.url,
                st.attempts
            );
            return Some(WireMessage::error(format!(
                "Failed to reconnect after {} attempts",
                st.attempts
            )));
        }

        let delay = self
            .shared
            .options
            .base_delay
            .saturating_mul(2u32.saturating_pow(st.attempts));
        st.attempts += 1;
        st.phase = Phase::Reconnecting;
        tracing::info!("Scheduling reconnection {}/{} in {:?}", st.attempts, max, delay);

        let shared = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                Transport { shared }.run_reconnect().await;
            }
        });
        st.timer = Some(PendingReconnect { delay, handle });

        Some(WireMessage::reconnecting())
    }

    async fn run_reconnect(&self) {
        // A disconnect or forced reconnect aborts this task while the timer is
        // still registered, including while it waits for the lock below.
        let _guard = self.shared.connect_lock.lock().await;
        self.shared.lock().timer = None;

        let signal = match self.open_link().await {
            Ok(()) => Some(WireMessage::ready()),
            Err(_) => {
                let mut st = self.shared.lock();
                // Only a failure of this attempt leaves the phase at Failed;
                // a disconnect in the meantime leaves it Idle.
                if matches!(st.phase, Phase::Failed) {
                    self.schedule_reconnect(&mut st)
                } else {
                    None
                }
            }
        };
        if let Some(signal) = signal {
            self.shared.subscribers.emit(&signal);
        }
    }
}

async fn read_link(
    shared: Weak<Shared>,
    generation: u64,
    mut incoming: mpsc::UnboundedReceiver<LinkEvent>,
) {
    while let Some(event) = incoming.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let transport = Transport { shared };
        match event {
            LinkEvent::Frame(frame) => transport.handle_frame(generation, &frame),
            LinkEvent::Closed {
                clean,
                reason,
                unsent,
            } => {
                transport.handle_close(generation, clean, &reason, unsent);
                return;
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        Transport { shared }.handle_close(generation, false, "link dropped", Vec::new());
    }
}
