//! Service configuration: schema, defaults, and normalization.
//!
//! Configuration is loaded from a YAML file or a key=value env file
//! (auto-detected), with every key also readable from the process
//! environment under an `ASK4ME_` prefix. See [`loader`].

mod error;
pub mod loader;

pub use error::ConfigError;
pub use loader::load_auto;

use serde::Deserialize;
use url::Url;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Externally reachable origin used to construct interaction URLs.
    #[serde(default)]
    pub base_url: String,

    /// Shared bearer credential for `/v1/ask`.
    #[serde(default)]
    pub api_key: String,

    /// Push-notification gateway credential. Empty disables the channel.
    #[serde(default)]
    pub serverchan_sendkey: String,

    /// Notifier destination URLs. Empty disables the channel.
    #[serde(default)]
    pub apprise_urls: Vec<String>,

    /// Executable name or path of the notifier binary.
    #[serde(default)]
    pub apprise_bin: String,

    /// Durable store file path.
    #[serde(default)]
    pub sqlite_path: String,

    /// Applied when a question's `expires_in_seconds` is non-positive.
    #[serde(default)]
    pub default_expires_in_seconds: i64,

    /// Stream heartbeat cadence.
    #[serde(default)]
    pub sse_heartbeat_interval_seconds: u64,

    /// Bind address, `host:port` or `:port`.
    #[serde(default)]
    pub listen_addr: String,

    /// Terminal-cache TTL.
    #[serde(default)]
    pub terminal_cache_seconds: u64,
}

impl Config {
    /// Validates required keys and fills defaults for the rest.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingKey { key: "base_url" });
        }
        Url::parse(&self.base_url)?;
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingKey { key: "api_key" });
        }
        if self.sqlite_path.trim().is_empty() {
            self.sqlite_path = "./ask4me.db".to_string();
        }
        if self.apprise_bin.trim().is_empty() {
            self.apprise_bin = "apprise".to_string();
        }
        if self.default_expires_in_seconds <= 0 {
            self.default_expires_in_seconds = 3600;
        }
        if self.sse_heartbeat_interval_seconds == 0 {
            self.sse_heartbeat_interval_seconds = 15;
        }
        if self.listen_addr.trim().is_empty() {
            self.listen_addr = ":8080".to_string();
        }
        if self.terminal_cache_seconds == 0 {
            self.terminal_cache_seconds = 60;
        }
        Ok(())
    }

    /// Bind address in the `host:port` form the listener expects.
    /// A bare `:port` binds all interfaces.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        let addr = self.listen_addr.trim();
        if let Some(port) = addr.strip_prefix(':') {
            format!("0.0.0.0:{port}")
        } else {
            addr.to_string()
        }
    }
}
