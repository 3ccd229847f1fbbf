//! Client configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use chat_core::Intents;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub auth: AuthConfig,
    pub api: ApiConfig,
    pub gateway: GatewayConfig,
    pub shards: ShardingConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Credentials
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Bot token, sent as `Authorization: Bot <token>` and in Identify/Resume
    pub token: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig").field("token", &"<redacted>").finish()
    }
}

/// HTTP control-plane settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub version: u8,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Retries allowed for a single request after 429 responses
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    /// Fixed delay before the single retry of a 502/503 response
    #[serde(default = "default_upstream_retry_delay_ms")]
    pub upstream_retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    /// Versioned REST base, e.g. `https://discord.com/api/v10`
    #[must_use]
    pub fn versioned_base(&self) -> String {
        format!("{}/v{}", self.base_url.trim_end_matches('/'), self.version)
    }
}

/// Gateway connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Fixed gateway URL; resolved through the REST API when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub intents: Intents,
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u8,
}

/// Shard layout overrides
#[derive(Debug, Clone, Deserialize)]
pub struct ShardingConfig {
    /// Total shard count; the server recommendation is used when absent
    #[serde(default)]
    pub shard_count: Option<u32>,
    /// Subset of shard ids this process runs; all when absent
    #[serde(default)]
    pub shard_ids: Option<Vec<u32>>,
    /// Identify concurrency; the server value is used when absent
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_identify_interval_ms")]
    pub identify_interval_ms: u64,
}

// Default value functions
fn default_app_name() -> String {
    "chat-client".to_string()
}

fn default_api_base_url() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot (chat-client, {})",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_max_rate_limit_retries() -> u32 {
    5
}

fn default_upstream_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_large_threshold() -> u8 {
    50
}

fn default_ready_timeout_secs() -> u64 {
    60
}

fn default_identify_interval_ms() -> u64 {
    5000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            version: default_api_version(),
            user_agent: default_user_agent(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            upstream_retry_delay_ms: default_upstream_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            intents: Intents::default(),
            hello_timeout_ms: default_hello_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            large_threshold: default_large_threshold(),
        }
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: None,
            shard_ids: None,
            max_concurrency: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            identify_interval_ms: default_identify_interval_ms(),
        }
    }
}

/// Read and parse an optional variable; a present but malformed value is an error
fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

fn parse_list(name: &'static str) -> Result<Option<Vec<u32>>, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ConfigError::InvalidValue(name, raw.clone()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the token
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: Environment::default(),
            },
            auth: AuthConfig {
                token: token.into(),
            },
            api: ApiConfig::default(),
            gateway: GatewayConfig::default(),
            shards: ShardingConfig::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `BOT_TOKEN` is missing or any set variable is malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let token = env::var("BOT_TOKEN").map_err(|_| ConfigError::MissingVar("BOT_TOKEN"))?;
        if token.trim().is_empty() {
            return Err(ConfigError::InvalidValue("BOT_TOKEN", String::new()));
        }

        let intents = parse_var::<u64>("GATEWAY_INTENTS")?
            .map(Intents::from_bits_truncate)
            .unwrap_or_default();

        let config = Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            auth: AuthConfig {
                token: token.trim().to_string(),
            },
            api: ApiConfig {
                base_url: env::var("API_BASE_URL").unwrap_or_else(|_| default_api_base_url()),
                version: parse_var("API_VERSION")?.unwrap_or_else(default_api_version),
                user_agent: env::var("USER_AGENT").unwrap_or_else(|_| default_user_agent()),
                max_rate_limit_retries: parse_var("REST_MAX_RATE_LIMIT_RETRIES")?
                    .unwrap_or_else(default_max_rate_limit_retries),
                upstream_retry_delay_ms: parse_var("REST_UPSTREAM_RETRY_DELAY_MS")?
                    .unwrap_or_else(default_upstream_retry_delay_ms),
                request_timeout_secs: parse_var("REST_TIMEOUT_SECS")?
                    .unwrap_or_else(default_request_timeout_secs),
            },
            gateway: GatewayConfig {
                url: env::var("GATEWAY_URL").ok().filter(|s| !s.trim().is_empty()),
                intents,
                hello_timeout_ms: parse_var("GATEWAY_HELLO_TIMEOUT_MS")?
                    .unwrap_or_else(default_hello_timeout_ms),
                reconnect_base_ms: parse_var("GATEWAY_RECONNECT_BASE_MS")?
                    .unwrap_or_else(default_reconnect_base_ms),
                reconnect_max_ms: parse_var("GATEWAY_RECONNECT_MAX_MS")?
                    .unwrap_or_else(default_reconnect_max_ms),
                large_threshold: parse_var("GATEWAY_LARGE_THRESHOLD")?
                    .unwrap_or_else(default_large_threshold),
            },
            shards: ShardingConfig {
                shard_count: parse_var("SHARD_COUNT")?,
                shard_ids: parse_list("SHARD_IDS")?,
                max_concurrency: parse_var("MAX_CONCURRENCY")?,
                ready_timeout_secs: parse_var("SHARD_READY_TIMEOUT_SECS")?
                    .unwrap_or_else(default_ready_timeout_secs),
                identify_interval_ms: parse_var("IDENTIFY_INTERVAL_MS")?
                    .unwrap_or_else(default_identify_interval_ms),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=250).contains(&self.gateway.large_threshold) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_LARGE_THRESHOLD",
                self.gateway.large_threshold.to_string(),
            ));
        }
        if self.shards.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidValue("MAX_CONCURRENCY", "0".to_string()));
        }
        if let (Some(count), Some(ids)) = (self.shards.shard_count, &self.shards.shard_ids) {
            if let Some(bad) = ids.iter().find(|id| **id >= count) {
                return Err(ConfigError::InvalidValue("SHARD_IDS", bad.to_string()));
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
