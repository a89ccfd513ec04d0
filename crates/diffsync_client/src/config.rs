//! Client configuration, loadable from TOML.
//!
//! ```toml
//! server_url = "wss://sync.example.com/diffsync"
//! client_id = "3346dff7-aada-4d5f-a3da-c93ff0ffc472"
//! ping_interval_secs = 30
//!
//! [reconnect]
//! enabled = true
//! max_attempts = 10
//! base_delay_secs = 2
//! max_delay_secs = 32
//! ```
//!
//! Only `server_url` is required. A missing `client_id` gets a fresh v4 UUID.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};

/// Configuration for the sync client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncClientConfig {
    /// Server URL. `http(s)` is rewritten to `ws(s)` when connecting.
    pub server_url: String,

    /// Identity of this client on the wire.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Reconnection configuration.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Seconds between keepalive pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

/// Reconnection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Whether to automatically reconnect on disconnect.
    pub enabled: bool,
    /// Maximum number of reconnection attempts (0 = infinite).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff.
    pub base_delay_secs: u64,
    /// Maximum delay in seconds for exponential backoff.
    pub max_delay_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_delay_secs: 2,
            max_delay_secs: 32,
        }
    }
}

impl ReconnectConfig {
    /// Backoff before reconnection attempt `attempt` (1-based), in seconds.
    pub fn delay_secs(&self, attempt: u32) -> u64 {
        self.base_delay_secs
            .saturating_pow(attempt)
            .min(self.max_delay_secs)
    }
}

fn default_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_ping_interval() -> u64 {
    30
}

impl SyncClientConfig {
    /// Config for `server_url` with a fresh client id and default settings.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client_id: default_client_id(),
            reconnect: ReconnectConfig::default(),
            ping_interval_secs: default_ping_interval(),
        }
    }

    /// Set the client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the reconnection configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: SyncClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Save the config, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check the config and return the WebSocket URL to connect to.
    pub fn validate(&self) -> Result<Url> {
        if self.server_url.trim().is_empty() {
            return Err(ClientError::Configuration(
                "server_url is required".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(ClientError::Configuration(
                "client_id must not be empty".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 {
            return Err(ClientError::Configuration(
                "ping_interval_secs must be greater than zero".to_string(),
            ));
        }

        let mut url = Url::parse(&self.server_url).map_err(|e| {
            ClientError::Configuration(format!("invalid server_url '{}': {}", self.server_url, e))
        })?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(ClientError::Configuration(format!(
                    "unsupported server_url scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            ClientError::Configuration(format!("cannot use scheme '{scheme}' for server_url"))
        })?;
        Ok(url)
    }
}
