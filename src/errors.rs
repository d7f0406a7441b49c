//! Typed error hierarchy for agentboard.
//!
//! Three enums cover the three places where callers branch on the failure:
//! - `ConfigError` for loading and validating `agentboard.toml`
//! - `DeliveryError` for handing a frame to one subscriber connection
//! - `ClientError` for the subscriber and producer clients

use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Why a frame could not be queued for a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's socket task is gone; the connection should be evicted.
    #[error("connection closed")]
    Closed,

    /// The connection's outbound queue is full; the connection is evicted.
    #[error("connection queue full")]
    Full,
}

/// Errors from the subscriber and producer clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid server URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("WebSocket connection failed: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("WebSocket transport error: {0}")]
    Transport(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Server responded with {status}: {body}")]
    Status { status: u16, body: String },
}
