//! Application configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use pricewatch_proxy::ProxyConfig;
use pricewatch_stream::StreamConfig;

use crate::error::{AppError, AppResult};

/// Price stream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSection {
    /// WebSocket endpoint URL.
    #[serde(default = "default_stream_url")]
    pub url: String,
    /// Reconnect attempts before giving up until an explicit `connect()`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnect backoff (ms); doubles per attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Idle interval before a ping is sent (ms).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// How long to wait for the matching pong (ms).
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_stream_url() -> String {
    "wss://stream.pricewatch.dev/prices".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    /// Base URL every endpoint path is joined against.
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Per-request timeout (ms).
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_base_url() -> String {
    "https://api.pricewatch.dev/".to_string()
}

fn default_api_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_ms: default_api_timeout_ms(),
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// SQLite database path. When the file cannot be opened the store
    /// falls back to a volatile in-memory database.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "./data/pricewatch.db".to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Network cache proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySection {
    /// Origin the static manifest paths resolve against.
    #[serde(default = "default_proxy_base_url")]
    pub base_url: String,
    /// Deployment version; bump on every release.
    #[serde(default = "default_proxy_version")]
    pub version: u32,
    /// Paths prefetched at install time. Keep the offline page in here.
    #[serde(default = "default_static_manifest")]
    pub static_manifest: Vec<String>,
    /// Offline fallback page path.
    #[serde(default = "default_offline_page")]
    pub offline_page: String,
    /// Deadline for the network-first strategies (ms).
    #[serde(default = "default_network_deadline_ms")]
    pub network_deadline_ms: u64,
}

fn default_proxy_base_url() -> String {
    "https://app.pricewatch.dev/".to_string()
}

fn default_proxy_version() -> u32 {
    1
}

fn default_static_manifest() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/assets/app.css",
        "/assets/app.js",
        "/offline.html",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_offline_page() -> String {
    "/offline.html".to_string()
}

fn default_network_deadline_ms() -> u64 {
    3000
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            base_url: default_proxy_base_url(),
            version: default_proxy_version(),
            static_manifest: default_static_manifest(),
            offline_page: default_offline_page(),
            network_deadline_ms: default_network_deadline_ms(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub proxy: ProxySection,
}

impl AppConfig {
    /// Load configuration from `PRICEWATCH_CONFIG` or the default path,
    /// falling back to defaults when no file exists.
    pub fn load() -> AppResult<Self> {
        let config_path = std::env::var("PRICEWATCH_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject URLs that cannot possibly work before anything connects.
    pub fn validate(&self) -> AppResult<()> {
        let stream_url = Url::parse(&self.stream.url)
            .map_err(|e| AppError::Config(format!("Invalid stream.url: {e}")))?;
        if !matches!(stream_url.scheme(), "ws" | "wss") {
            return Err(AppError::Config(format!(
                "stream.url must be ws:// or wss://, got {}",
                stream_url.scheme()
            )));
        }
        self.api_base_url()?;
        self.proxy_config()?;
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.stream.url.clone(),
            max_reconnect_attempts: self.stream.max_reconnect_attempts,
            reconnect_base_delay_ms: self.stream.reconnect_base_delay_ms,
            heartbeat_interval_ms: self.stream.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.stream.heartbeat_timeout_ms,
        }
    }

    pub fn api_base_url(&self) -> AppResult<Url> {
        Url::parse(&self.api.base_url)
            .map_err(|e| AppError::Config(format!("Invalid api.base_url: {e}")))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    pub fn proxy_config(&self) -> AppResult<ProxyConfig> {
        let base_url = Url::parse(&self.proxy.base_url)
            .map_err(|e| AppError::Config(format!("Invalid proxy.base_url: {e}")))?;
        Ok(ProxyConfig {
            base_url,
            version: self.proxy.version,
            static_manifest: self.proxy.static_manifest.clone(),
            offline_page: self.proxy.offline_page.clone(),
            network_deadline_ms: self.proxy.network_deadline_ms,
        })
    }
}
