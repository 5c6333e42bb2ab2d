//! Client configuration.
//!
//! Layered with figment: struct defaults, then an optional TOML file, then
//! `SANSKARA_*` environment variables (`SANSKARA_MAX_RECONNECT_ATTEMPTS=5`).

use crate::transport::TransportOptions;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend origin, e.g. `https://api.example.com`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Zero disables the heartbeat.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_path: default_ws_path(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            history_page_size: default_history_page_size(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_history_page_size() -> u32 {
    50
}

impl ClientConfig {
    /// WebSocket endpoint derived from the API origin (`http` → `ws`,
    /// `https` → `wss`).
    pub fn ws_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https:") {
            format!("wss:{rest}")
        } else if let Some(rest) = base.strip_prefix("http:") {
            format!("ws:{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}{}", self.ws_path)
    }

    /// Base for REST calls (`{origin}/api`).
    pub fn api_url(&self) -> String {
        format!("{}/api", self.api_base_url.trim_end_matches('/'))
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_attempts: self.max_reconnect_attempts,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Defaults → `path` (if given) → `SANSKARA_*` env vars.
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, figment::Error> {
    let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("SANSKARA_")).extract()
}
