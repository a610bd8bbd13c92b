//! Error types for the depth-sync crate.
//!
//! This module defines the errors raised while fetching snapshots, talking to
//! the stream, and keeping order book replicas in sync.

use thiserror::Error as ThisError;

use crate::client::subscription::ChannelKey;
use crate::types::InstrumentKey;

/// The main error type for this crate
#[derive(Debug, ThisError)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed endpoint URL
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Exchange returned an error response
    #[error("API error ({}): {}", .0.status, .0.message)]
    Api(ApiError),

    /// Rate limit exceeded
    #[error("Rate limited{}", .retry_after_ms.map(|ms| format!(", retry after {}ms", ms)).unwrap_or_default())]
    RateLimited {
        /// Retry after this many milliseconds
        retry_after_ms: Option<u64>,
    },

    /// No replica is loaded for this book
    #[error("Order book not found: {0}")]
    BookNotFound(InstrumentKey),

    /// No active subscription matches this channel
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(ChannelKey),

    /// A buffered diff could not be bridged to the freshly loaded snapshot
    #[error("Sequence gap on {key}: expected update {expected}, got {got}")]
    SequenceGap {
        /// Book the gap was detected on
        key: InstrumentKey,
        /// Next sequence id the replica needed
        expected: u64,
        /// First sequence id of the offending diff
        got: u64,
    },

    /// Diff carried no level changes and empty diffs are not allowed
    #[error("Empty depth update for {0}")]
    EmptyUpdate(InstrumentKey),

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed")]
    ConnectionClosed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// No async runtime available, or the manager was shut down
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Error returned by the exchange API
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Exchange error code (if provided)
    pub code: Option<i64>,
    /// Error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    /// Create an API error with an exchange error code
    pub fn with_code(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl Error {
    /// True for the not-found conditions returned to `resubscribe` callers
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BookNotFound(_) | Error::SubscriptionNotFound(_)
        )
    }
}
