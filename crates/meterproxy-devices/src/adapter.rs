//! Shared adapter types: error taxonomy and connection state.

use serde::Serialize;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Error type for meter adapter operations.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Adapter configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection error (initial connect or reconnect)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Communication error on an established session
    #[error("Communication error: {0}")]
    Communication(String),

    /// Payload on a mapped topic is not a decimal number
    #[error("Malformed payload on {topic}: {payload:?}")]
    MalformedPayload { topic: String, payload: String },

    /// Adapter stopped
    #[error("Adapter is stopped")]
    Stopped,

    /// Other error
    #[error("Adapter error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Connection state of the bus subscriber.
///
/// Transitions:
///
/// ```text
/// Disconnected ──connect──→ Connecting ──ok──→ Connected
///      ↑                        │                  │
///      └────────failed──────────┘   unexpected drop┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}
