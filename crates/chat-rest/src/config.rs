//! REST dispatcher configuration

use chat_common::ClientConfig;
use std::time::Duration;

/// Settings for [`RestDispatcher`](crate::RestDispatcher)
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Versioned API base, e.g. `https://discord.com/api/v10`
    pub base_url: String,
    pub user_agent: String,
    /// Retries allowed after 429 responses before giving up
    pub max_rate_limit_retries: u32,
    /// Delay before the single 502/503 retry
    pub upstream_retry_delay: Duration,
    /// Per-attempt HTTP timeout
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://discord.com/api/v10".to_string(),
            user_agent: format!("DiscordBot (chat-client, {})", env!("CARGO_PKG_VERSION")),
            max_rate_limit_retries: 5,
            upstream_retry_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
        }
    }
}

impl RestConfig {
    /// Join a route path onto the base URL
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl From<&ClientConfig> for RestConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_url: config.api.versioned_base(),
            user_agent: config.api.user_agent.clone(),
            max_rate_limit_retries: config.api.max_rate_limit_retries,
            upstream_retry_delay: Duration::from_millis(config.api.upstream_retry_delay_ms),
            timeout: Duration::from_secs(config.api.request_timeout_secs),
        }
    }
}
