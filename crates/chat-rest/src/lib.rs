//! # chat-rest
//!
//! Rate-limited client for the HTTP control-plane API.
//!
//! ## Features
//!
//! - **Per-route buckets**: requests are keyed by route with ids abstracted
//!   out, re-keyed when the server reports a new bucket hash
//! - **FIFO per bucket**: requests to one route go out in enqueue order,
//!   different routes run concurrently
//! - **Global lock**: a global 429 pauses every non-exempt request
//! - **Retry policy**: 429 retried after `Retry-After`, 502/503 retried once
//!
//! ## Example
//!
//! ```ignore
//! use chat_rest::{RestConfig, RestDispatcher, RestRequest};
//!
//! let rest = RestDispatcher::new(token, RestConfig::default())?;
//! let gateway = rest.get_gateway_bot().await?;
//!
//! let message = rest
//!     .request(RestRequest::post(format!("/channels/{channel_id}/messages"))
//!         .json(&serde_json::json!({ "content": "hello" }))?)
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod routing;

pub use client::{
    Attachment, GatewayBotInfo, GatewayInfo, RestDispatcher, RestRequest, RestResponse,
    SessionStartLimit,
};
pub use config::RestConfig;
pub use error::{ApiErrorBody, RestError, RestResult};
pub use ratelimit::{RateLimitBucket, RateLimitHeaders, RateLimitScope, RateLimiter};
pub use routing::{is_global_exempt, BucketKey};

// Re-exported so callers can build requests without a direct reqwest dependency
pub use reqwest::Method;
