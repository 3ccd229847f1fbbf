//! Session configuration

use crate::error::GatewayResult;
use crate::protocol::{IdentifyProperties, PresenceUpdatePayload};
use chat_common::ClientConfig;
use chat_core::Intents;
use std::time::Duration;
use url::Url;

/// Gateway protocol version this client speaks
pub const GATEWAY_VERSION: u8 = 10;

/// Configuration shared by every session of a bot
#[derive(Clone)]
pub struct SessionConfig {
    pub token: String,
    pub intents: Intents,
    pub large_threshold: u8,
    pub properties: IdentifyProperties,
    /// Presence sent with Identify
    pub presence: Option<PresenceUpdatePayload>,
    /// Fixed gateway URL; resolved through REST when `None`
    pub gateway_url: Option<String>,
    pub version: u8,
    /// How long to wait for Hello after the socket opens
    pub hello_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: Intents::NON_PRIVILEGED,
            large_threshold: 50,
            properties: IdentifyProperties::default(),
            presence: None,
            gateway_url: None,
            version: GATEWAY_VERSION,
            hello_timeout: Duration::from_secs(20),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("token", &"[REDACTED]")
            .field("intents", &self.intents)
            .field("large_threshold", &self.large_threshold)
            .field("gateway_url", &self.gateway_url)
            .field("version", &self.version)
            .field("hello_timeout", &self.hello_timeout)
            .finish_non_exhaustive()
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            token: config.auth.token.clone(),
            intents: config.gateway.intents,
            large_threshold: config.gateway.large_threshold,
            properties: IdentifyProperties::default(),
            presence: None,
            gateway_url: config.gateway.url.clone(),
            version: GATEWAY_VERSION,
            hello_timeout: Duration::from_millis(config.gateway.hello_timeout_ms),
            reconnect_base: Duration::from_millis(config.gateway.reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.gateway.reconnect_max_ms),
        }
    }
}

/// Pin the protocol version and JSON encoding on a gateway URL
///
/// Any `v`, `encoding` or `compress` parameters already present are replaced.
pub fn normalize_gateway_url(raw: &str, version: u8) -> GatewayResult<String> {
    let mut url = Url::parse(raw)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !matches!(key.as_ref(), "v" | "encoding" | "compress"))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("v", &version.to_string())
        .append_pair("encoding", "json");

    Ok(url.into())
}
