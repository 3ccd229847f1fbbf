//! Gateway error types

use chat_rest::RestError;
use thiserror::Error;

/// Gateway error type
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Resolving the gateway endpoint failed
    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Frame could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Gateway URL could not be parsed
    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No Hello arrived within the configured window after the socket opened
    #[error("Hello not received within {0} ms")]
    HelloTimeout(u64),

    /// Server closed with a code that forbids reconnecting
    #[error("Fatally closed with code {code}: {reason}")]
    FatallyClosed { code: u16, reason: String },

    /// Session was invalidated and must not be resumed
    #[error("Session invalidated")]
    SessionInvalidated,

    /// Server closed with a code that requires a configuration change
    #[error("Closed by server with code {code}: {reason}")]
    ClosedByServer { code: u16, reason: String },

    /// Command issued while no socket is open
    #[error("Not connected")]
    NotConnected,

    /// `connect()` called while the session is already running
    #[error("Session already running")]
    AlreadyRunning,

    /// Session was disconnected by the caller
    #[error("Session shut down")]
    Shutdown,

    /// Shard did not become ready in time
    #[error("Ready not received within {0} s")]
    ReadyTimeout(u64),

    /// Identify budget exhausted for the current window
    #[error("Session start limit reached: {remaining} remaining, {required} required, resets in {reset_after} ms")]
    SessionStartLimit {
        remaining: u32,
        required: u32,
        reset_after: u64,
    },

    /// Driver task is gone
    #[error("Command channel closed")]
    CommandChannelClosed,
}

impl GatewayError {
    /// Whether retrying the same session can never succeed
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FatallyClosed { .. }
            | Self::SessionInvalidated
            | Self::ClosedByServer { .. }
            | Self::InvalidUrl(_)
            | Self::SessionStartLimit { .. } => true,
            Self::Rest(e) => !e.is_retryable(),
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(error))
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
