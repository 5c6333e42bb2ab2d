//! Conversation history over HTTP.

use crate::HistoryError;
use async_trait::async_trait;
use sanskara_core::{HistoryEventType, HistoryPage};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Responses kept by [`HttpHistoryClient`].
const MAX_CACHE_ENTRIES: usize = 100;

/// A request for one page of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: u32,
    pub offset: u32,
    /// Empty means all event types.
    pub event_types: Vec<HistoryEventType>,
}

impl HistoryQuery {
    fn cache_key(&self, session_id: &str) -> String {
        let types: Vec<&str> = self.event_types.iter().map(|t| t.as_str()).collect();
        format!("{session_id}_offset_{}_limit_{}_{}", self.offset, self.limit, types.join(","))
    }
}

/// Where the message store fetches older messages from.
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
    /// Fetch one page, newest event first.
    async fn fetch(&self, session_id: &str, query: &HistoryQuery) -> Result<HistoryPage, HistoryError>;
}

#[derive(Default)]
struct Cache {
    order: VecDeque<String>,
    pages: HashMap<String, HistoryPage>,
}

impl Cache {
    fn insert(&mut self, key: String, page: HistoryPage) {
        if !self.pages.contains_key(&key) {
            if self.order.len() >= MAX_CACHE_ENTRIES {
                if let Some(oldest) = self.order.pop_front() {
                    self.pages.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }
        self.pages.insert(key, page);
    }
}

/// `GET {api}/sessions/{id}/history` with a bounded response cache.
pub struct HttpHistoryClient {
    http: reqwest::Client,
    api_url: String,
    cache: Mutex<Cache>,
}

impl HttpHistoryClient {
    /// `api_url` is the REST base, e.g. `https://host/api`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            cache: Mutex::new(Cache::default()),
        }
    }

    pub fn clear_cache(&self) {
        let mut cache = self.lock_cache();
        cache.order.clear();
        cache.pages.clear();
    }

    /// Drop every cached page of `session_id`.
    pub fn invalidate_session(&self, session_id: &str) {
        let prefix = format!("{session_id}_");
        let mut cache = self.lock_cache();
        cache.order.retain(|k| !k.starts_with(&prefix));
        cache.pages.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().pages.len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HistorySource for HttpHistoryClient {
    async fn fetch(&self, session_id: &str, query: &HistoryQuery) -> Result<HistoryPage, HistoryError> {
        let key = query.cache_key(session_id);
        if let Some(page) = self.lock_cache().pages.get(&key) {
            tracing::debug!("History cache hit: {}", key);
            return Ok(page.clone());
        }

        let url = format!("{}/sessions/{}/history", self.api_url, session_id);
        let mut request = self
            .http
            .get(&url)
            .query(&[("limit", query.limit), ("offset", query.offset)]);
        if !query.event_types.is_empty() {
            let types: Vec<&str> = query.event_types.iter().map(|t| t.as_str()).collect();
            request = request.query(&[("event_types_filter", types.join(","))]);
        }

        let response = request.send().await.map_err(HistoryError::Request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::status(status.as_u16()));
        }
        let page: HistoryPage = response.json().await.map_err(HistoryError::Decode)?;

        tracing::debug!(
            "Loaded {} history events for {} (has_more: {})",
            page.events.len(),
            session_id,
            page.has_more
        );
        self.lock_cache().insert(key, page.clone());
        Ok(page)
    }
}
