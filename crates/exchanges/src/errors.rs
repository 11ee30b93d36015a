//! Streaming error types
//!
//! One enum covers the transport, the connection supervisor, the
//! subscription registry and the facade. Variants carry owned strings so the
//! error can be cloned into every waiter of a failed send.

use thiserror::Error;

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Transport could not be opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// Send attempted with no live channel
    #[error("WebSocket not connected")]
    NotConnected,

    /// Backoff budget spent; requires an explicit restart
    #[error("Failed to reconnect after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Registry could not register (the subscribe frame was not sent)
    #[error("Failed to subscribe: {0}")]
    Subscription(String),

    #[error("Subscription {0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Receive window elapsed with no frame
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer closed the channel
    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Supervisor was asked to stop while reconnecting
    #[error("Connection supervisor stopped")]
    Stopped,
}

impl StreamError {
    /// Stable snake_case code for command payloads
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Connection(_) => "connection_error",
            StreamError::NotConnected => "not_connected",
            StreamError::ReconnectExhausted { .. } => "reconnect_exhausted",
            StreamError::Subscription(_) => "subscription_error",
            StreamError::NotFound(_) => "not_found",
            StreamError::Validation(_) => "validation_error",
            StreamError::Configuration(_) => "configuration_error",
            StreamError::Timeout(_) => "timeout",
            StreamError::Closed(_) => "closed",
            StreamError::Network(_) => "network_error",
            StreamError::Handshake(_) => "handshake_error",
            StreamError::InvalidUrl(_) => "invalid_url",
            StreamError::Serialization(_) => "serialization_error",
            StreamError::Stopped => "stopped",
        }
    }

    /// Faults that mean the live channel is gone and must be rebuilt
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            StreamError::Closed(_) | StreamError::Network(_) | StreamError::Handshake(_)
        )
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
