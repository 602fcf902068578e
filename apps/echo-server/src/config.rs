//! Echo server configuration.
//!
//! Read as TOML from the file named by `WSLINE_CONFIG`, else `wsline.toml`
//! in the working directory. Missing file or fields fall back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsline_server::ServerConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "WSLINE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "wsline.toml";

/// Echo server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Idle time after which a silent peer is dropped.
    #[serde(default = "default_pong_wait_ms")]
    pub pong_wait_ms: u64,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Outgoing frames queued per connection.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Log every received message at `info` instead of `debug`.
    #[serde(default)]
    pub log_messages: bool,
}

fn default_host() -> String {
    ServerConfig::default().host
}

fn default_port() -> u16 {
    ServerConfig::default().port
}

fn default_heartbeat_interval_ms() -> u64 {
    millis(ServerConfig::default().heartbeat_interval)
}

fn default_pong_wait_ms() -> u64 {
    millis(ServerConfig::default().pong_wait)
}

fn default_read_buffer_size() -> usize {
    ServerConfig::default().read_buffer_size
}

fn default_max_message_size() -> usize {
    ServerConfig::default().max_message_size
}

fn default_send_buffer() -> usize {
    ServerConfig::default().send_buffer
}

fn default_write_timeout_ms() -> u64 {
    millis(ServerConfig::default().write_timeout)
}

fn default_handshake_timeout_ms() -> u64 {
    millis(ServerConfig::default().handshake_timeout)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pong_wait_ms: default_pong_wait_ms(),
            read_buffer_size: default_read_buffer_size(),
            max_message_size: default_max_message_size(),
            send_buffer: default_send_buffer(),
            write_timeout_ms: default_write_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            log_messages: false,
        }
    }
}

impl Config {
    /// Loads the configuration file, or defaults if there is none.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    /// Converts to the server's runtime configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            pong_wait: Duration::from_millis(self.pong_wait_ms),
            read_buffer_size: self.read_buffer_size,
            max_message_size: self.max_message_size,
            send_buffer: self.send_buffer,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
        }
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
