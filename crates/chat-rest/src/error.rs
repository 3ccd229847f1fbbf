//! REST client error types

use serde::Deserialize;
use std::fmt;

/// Error payload returned by the API for failed requests
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiErrorBody {
    /// Platform error code (0 when the body carried none)
    #[serde(default)]
    pub code: u64,
    #[serde(default)]
    pub message: String,
    /// Nested per-field validation errors, kept verbatim
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

impl ApiErrorBody {
    /// Decode a response body, falling back to the raw text for non-JSON bodies
    pub fn from_text(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| Self {
            code: 0,
            message: text.trim().to_string(),
            errors: None,
        })
    }
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (code {})", self.message, self.code)
        }
    }
}

/// Error type for REST operations
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: ApiErrorBody },

    #[error("Rate limit retries exhausted for {route} after {attempts} attempts")]
    RateLimitExhausted { route: String, attempts: u32 },

    #[error("Upstream unavailable ({status}) after {attempts} attempts")]
    Upstream { status: u16, attempts: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("REST dispatcher is shut down")]
    Shutdown,
}

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;

impl RestError {
    /// Whether the same request could succeed if sent again later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimitExhausted { .. } | Self::Upstream { .. } => true,
            Self::Api { .. } | Self::Json(_) | Self::InvalidHeader(_) | Self::Shutdown => false,
        }
    }

    /// HTTP status associated with the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Upstream { status, .. } => Some(*status),
            Self::RateLimitExhausted { .. } => Some(429),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
