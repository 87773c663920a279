//! Crate-wide error type

use serde_json::Value;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the signing, upstream, storage and routing layers.
///
/// Feed transport failures are wrapped as `WebSocket` for the reconnect
/// loop's logs; they never reach a caller.
#[derive(Debug, Error)]
pub enum AppError {
    /// Required credentials or settings are missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// 3Commas answered with status >= 400, or with a 2xx body that lacks
    /// the fields we need.
    #[error("3Commas error {status}")]
    Upstream {
        status: u16,
        body: Value,
        /// Seconds from a `Retry-After` header, when the upstream sent one.
        retry_after: Option<u64>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Parse(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Connection(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::WebSocket(e.to_string())
    }
}
