//! Chat log with streaming replies and history backfill.

use crate::history::{HistoryQuery, HistorySource};
use crate::listeners::{Listeners, Subscription};
use crate::HistoryError;
use sanskara_core::{ChatMessage, HistoryEventType, Role};
use std::sync::{Arc, Mutex, MutexGuard};

/// Change notifications from a [`MessageStore`].
#[derive(Debug)]
pub enum StoreEvent {
    Add(ChatMessage),
    Update(ChatMessage),
    /// Older messages prepended, in chronological order.
    HistoryLoaded(Vec<ChatMessage>),
    Cleared,
    Error(HistoryError),
}

/// Caller overrides for [`MessageStore::load_history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryRequest {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub event_types: Vec<HistoryEventType>,
}

struct StoreState {
    messages: Vec<ChatMessage>,
    /// Id of the reply currently streaming in.
    streaming: Option<String>,
    session_id: Option<String>,
    is_loading_history: bool,
    has_more_history: bool,
}

pub struct MessageStore {
    source: Arc<dyn HistorySource>,
    page_size: u32,
    state: Mutex<StoreState>,
    listeners: Listeners<StoreEvent>,
}

/// Clears the loading flag however `load_history` exits.
struct LoadingGuard<'a>(&'a Mutex<StoreState>);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).is_loading_history = false;
    }
}

fn lock(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageStore {
    pub fn new(source: Arc<dyn HistorySource>, page_size: u32) -> Self {
        Self {
            source,
            page_size,
            state: Mutex::new(StoreState {
                messages: Vec::new(),
                streaming: None,
                session_id: None,
                is_loading_history: false,
                has_more_history: true,
            }),
            listeners: Listeners::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    /// Session whose history [`load_history`](Self::load_history) pages through.
    pub fn set_session_id(&self, session_id: Option<String>) {
        self.lock().session_id = session_id;
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Append a message with a fresh id and the current time. Returns the id.
    pub fn add_message(&self, role: Role, content: impl Into<String>) -> String {
        let msg = ChatMessage::new(role, content);
        let id = msg.id.clone();
        self.lock().messages.push(msg.clone());
        self.listeners.emit(&StoreEvent::Add(msg));
        id
    }

    /// Begin a bot reply that arrives token by token. A stream already in
    /// progress is finalized first.
    pub fn start_streaming_message(&self) -> String {
        self.end_streaming_message();

        let mut msg = ChatMessage::new(Role::Bot, "");
        msg.is_streaming = true;
        let id = msg.id.clone();
        {
            let mut st = self.lock();
            st.messages.push(msg.clone());
            st.streaming = Some(id.clone());
        }
        self.listeners.emit(&StoreEvent::Add(msg));
        id
    }

    /// Append to the active stream. No-op when nothing is streaming.
    pub fn append_to_streaming_message(&self, text: &str) {
        let updated = {
            let mut st = self.lock();
            let StoreState { messages, streaming, .. } = &mut *st;
            let Some(id) = streaming.as_deref() else {
                return;
            };
            match messages.iter_mut().rev().find(|m| m.id == id) {
                Some(msg) => {
                    msg.content.push_str(text);
                    msg.clone()
                }
                None => return,
            }
        };
        self.listeners.emit(&StoreEvent::Update(updated));
    }

    /// Finalize the active stream, leaving it in the log.
    pub fn end_streaming_message(&self) {
        let updated = {
            let mut st = self.lock();
            let Some(id) = st.streaming.take() else {
                return;
            };
            match st.messages.iter_mut().rev().find(|m| m.id == id) {
                Some(msg) => {
                    msg.is_streaming = false;
                    msg.clone()
                }
                None => return,
            }
        };
        self.listeners.emit(&StoreEvent::Update(updated));
    }

    /// Prepend the page of history older than what is loaded.
    ///
    /// Does nothing while a load is in flight, once the server reported no
    /// more history, or without a session id. Failures are reported through
    /// [`StoreEvent::Error`] and leave the log untouched.
    pub async fn load_history(&self, request: HistoryRequest) {
        let (session_id, query) = {
            let mut st = self.lock();
            if st.is_loading_history || !st.has_more_history {
                return;
            }
            let Some(session_id) = st.session_id.clone() else {
                return;
            };
            st.is_loading_history = true;

            let loaded = st.messages.iter().filter(|m| m.role != Role::System).count();
            let query = HistoryQuery {
                limit: request.limit.unwrap_or(self.page_size),
                offset: request.offset.unwrap_or(loaded as u32),
                event_types: request.event_types,
            };
            (session_id, query)
        };
        let loading = LoadingGuard(&self.state);

        let result = self.source.fetch(&session_id, &query).await;

        let event = match result {
            Ok(page) => {
                let older: Vec<ChatMessage> = page
                    .events
                    .into_iter()
                    .rev()
                    .map(|event| event.into_chat_message())
                    .collect();

                let mut st = self.lock();
                if st.session_id.as_deref() != Some(session_id.as_str()) {
                    tracing::debug!("Discarding history for stale session {}", session_id);
                    return;
                }
                st.messages.splice(0..0, older.iter().cloned());
                st.has_more_history = page.has_more;
                StoreEvent::HistoryLoaded(older)
            }
            Err(e) => {
                tracing::warn!("Failed to load message history: {}", e);
                StoreEvent::Error(e)
            }
        };
        // Listeners may page again straight away.
        drop(loading);
        self.listeners.emit(&event);
    }

    /// Empty the log; used on session reset.
    pub fn clear_messages(&self) {
        {
            let mut st = self.lock();
            st.messages.clear();
            st.streaming = None;
            st.has_more_history = true;
        }
        self.listeners.emit(&StoreEvent::Cleared);
    }

    pub fn on_message_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.clone()
    }

    /// The reply currently streaming in, if any.
    pub fn active_message(&self) -> Option<ChatMessage> {
        let st = self.lock();
        let id = st.streaming.as_deref()?;
        st.messages.iter().rev().find(|m| m.id == id).cloned()
    }

    pub fn is_loading_history(&self) -> bool {
        self.lock().is_loading_history
    }

    pub fn has_more_history(&self) -> bool {
        self.lock().has_more_history
    }
}
