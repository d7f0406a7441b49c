//! Layered configuration for agentboard.
//!
//! Values are resolved in order: built-in defaults, then `agentboard.toml`,
//! then environment variables, then CLI flags (applied by the caller).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! db_path = ".agentboard/agentboard.db"
//! cors_permissive = true
//!
//! [relay]
//! connection_queue = 256
//! ping_interval_secs = 30
//! pong_timeout_secs = 60
//!
//! [client]
//! server_url = "http://127.0.0.1:3000"
//! event_buffer_capacity = 100
//! snapshot_limit = 50
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::relay::buffer::DEFAULT_EVENT_BUFFER_CAPACITY;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "agentboard.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub client: ClientSection,
}

/// HTTP listener and storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Allow any origin (the dashboard UI is usually served from another port).
    #[serde(default = "default_cors_permissive")]
    pub cors_permissive: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            cors_permissive: default_cors_permissive(),
        }
    }
}

/// Fan-out and keepalive settings for subscriber connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySection {
    /// Outbound frames buffered per connection before frames start dropping.
    #[serde(default = "default_connection_queue")]
    pub connection_queue: usize,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            connection_queue: default_connection_queue(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

impl RelaySection {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// Settings for the `watch`, `emit` and `status` client commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: u32,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            event_buffer_capacity: default_event_buffer_capacity(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".agentboard/agentboard.db")
}

fn default_cors_permissive() -> bool {
    true
}

fn default_connection_queue() -> usize {
    256
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    60
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_event_buffer_capacity() -> usize {
    DEFAULT_EVENT_BUFFER_CAPACITY
}

fn default_snapshot_limit() -> u32 {
    50
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if it exists, defaults otherwise, then apply the
    /// process environment and validate.
    pub fn resolve(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Recognised: `PORT`, `AGENTBOARD_HOST`, `AGENTBOARD_DB`, `AGENTBOARD_URL`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                message: format!("'{}' is not a valid port", port),
            })?;
        }
        if let Some(host) = lookup("AGENTBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(db) = lookup("AGENTBOARD_DB") {
            self.server.db_path = PathBuf::from(db);
        }
        if let Some(url) = lookup("AGENTBOARD_URL") {
            self.client.server_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.connection_queue == 0 {
            return Err(ConfigError::Invalid {
                key: "relay.connection_queue",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.relay.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "relay.ping_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.relay.pong_timeout_secs <= self.relay.ping_interval_secs {
            return Err(ConfigError::Invalid {
                key: "relay.pong_timeout_secs",
                message: format!(
                    "must be greater than ping_interval_secs ({})",
                    self.relay.ping_interval_secs
                ),
            });
        }
        if self.client.event_buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "client.event_buffer_capacity",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
