//! Gateway endpoint discovery

use super::dispatcher::RestDispatcher;
use super::request::RestRequest;
use crate::error::RestResult;
use serde::{Deserialize, Serialize};

/// Response of `GET /gateway`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub url: String,
}

/// Identify budget for the current day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    /// Session starts allowed per reset window
    pub total: u32,
    /// Session starts left in the current window
    pub remaining: u32,
    /// Milliseconds until `remaining` resets
    pub reset_after: u64,
    /// Identify requests allowed per 5 seconds
    pub max_concurrency: u32,
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBotInfo {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

impl RestDispatcher {
    /// Resolve the gateway URL; requires no authentication
    pub async fn get_gateway(&self) -> RestResult<GatewayInfo> {
        self.request_json(RestRequest::get("/gateway").authenticated(false))
            .await
    }

    /// Resolve the gateway URL with the bot's shard recommendation and identify budget
    pub async fn get_gateway_bot(&self) -> RestResult<GatewayBotInfo> {
        let info: GatewayBotInfo = self.request_json(RestRequest::get("/gateway/bot")).await?;
        tracing::debug!(
            url = %info.url,
            shards = info.shards,
            remaining = info.session_start_limit.remaining,
            max_concurrency = info.session_start_limit.max_concurrency,
            "Resolved gateway"
        );
        Ok(info)
    }
}
