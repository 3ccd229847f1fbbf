//! Rate-limited request dispatcher
//!
//! Every HTTP call in the process goes through one [`RestDispatcher`]. A
//! request waits for its place in the route's FIFO queue, then for the
//! global lock and its bucket, and is retried on 429 (after the server's
//! `Retry-After`) and once on 502/503. Any other error status fails
//! immediately.

use super::request::RestRequest;
use crate::config::RestConfig;
use crate::error::{ApiErrorBody, RestError, RestResult};
use crate::ratelimit::{wait_duration, RateLimitHeaders, RateLimitScope, RateLimiter};
use chat_common::ClientConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Fallback wait when a 429 carries no retry information
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Successful response
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    /// Parsed body; `None` for 204 and empty bodies
    pub body: Option<serde_json::Value>,
}

impl RestResponse {
    pub fn is_empty(&self) -> bool {
        self.body.is_none()
    }

    /// Deserialize the body into a typed value
    pub fn json<T: DeserializeOwned>(self) -> RestResult<T> {
        let body = self.body.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}

/// Body of a 429 response
#[derive(Debug, Default, Deserialize)]
struct RateLimitedBody {
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

/// Shared, cloneable handle to the dispatcher
#[derive(Clone)]
pub struct RestDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    http: reqwest::Client,
    config: RestConfig,
    token: Option<String>,
    limiter: RateLimiter,
    closed: AtomicBool,
}

impl std::fmt::Debug for RestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDispatcher")
            .field("base_url", &self.inner.config.base_url)
            .field("global_locked", &self.inner.limiter.is_global_locked())
            .finish()
    }
}

impl RestDispatcher {
    /// Create a dispatcher authenticating with a bot token
    pub fn new(token: impl Into<String>, config: RestConfig) -> RestResult<Self> {
        Self::build(Some(token.into()), config)
    }

    /// Create a dispatcher that sends no Authorization header
    pub fn anonymous(config: RestConfig) -> RestResult<Self> {
        Self::build(None, config)
    }

    /// Create a dispatcher from the environment-loaded client configuration
    pub fn from_config(config: &ClientConfig) -> RestResult<Self> {
        Self::new(config.auth.token.clone(), RestConfig::from(config))
    }

    fn build(token: Option<String>, config: RestConfig) -> RestResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                http,
                config,
                token,
                limiter: RateLimiter::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    /// Rate-limit state, for inspection
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Reject new requests; requests already queued still complete
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send a request and deserialize the response body
    pub async fn request_json<T: DeserializeOwned>(&self, request: RestRequest) -> RestResult<T> {
        self.request(request).await?.json()
    }

    /// Send a request through the rate limiter, retrying as the server directs
    pub async fn request(&self, request: RestRequest) -> RestResult<RestResponse> {
        if self.is_shutdown() {
            return Err(RestError::Shutdown);
        }

        let inner = &self.inner;
        let key = request.bucket_key();
        let exempt = request.is_global_exempt();
        let url = inner.config.url_for(request.path());
        let headers = request.headers(inner.token.as_deref(), &inner.config.user_agent)?;

        let _ticket = inner.limiter.enqueue(&key).await;

        let mut rate_limited: u32 = 0;
        let mut upstream_retried = false;

        loop {
            inner.limiter.wait_ready(&key, exempt).await;

            let response = request
                .build(&inner.http, &url, headers.clone())?
                .send()
                .await?;
            let status = response.status().as_u16();
            let limits = RateLimitHeaders::parse(response.headers());
            inner.limiter.update(&key, &limits);

            debug!(bucket = %key, status, remaining = ?limits.remaining, "Response received");

            match status {
                429 => {
                    let text = response.text().await.unwrap_or_default();
                    let body: RateLimitedBody = serde_json::from_str(&text).unwrap_or_default();
                    let retry_after = limits
                        .retry_after
                        .or(body.retry_after)
                        .map_or(DEFAULT_RETRY_AFTER, wait_duration);
                    let global = limits.global || body.global;

                    rate_limited += 1;
                    if rate_limited > inner.config.max_rate_limit_retries {
                        error!(bucket = %key, attempts = rate_limited, "Rate limit retries exhausted");
                        return Err(RestError::RateLimitExhausted {
                            route: key.to_string(),
                            attempts: rate_limited,
                        });
                    }

                    let retry_ms = retry_after.as_millis() as u64;
                    if global {
                        warn!(bucket = %key, retry_ms, attempt = rate_limited, "Global rate limit hit");
                        inner.limiter.lock_global(retry_after);
                        if exempt {
                            tokio::time::sleep(retry_after).await;
                        }
                    } else {
                        if limits.scope == Some(RateLimitScope::Shared) {
                            warn!(bucket = %key, retry_ms, attempt = rate_limited, "Shared resource rate limit hit");
                        } else {
                            warn!(bucket = %key, retry_ms, attempt = rate_limited, "Route rate limit hit");
                        }
                        inner.limiter.hold_bucket(&key, retry_after);
                    }
                }
                502 | 503 => {
                    if upstream_retried {
                        error!(bucket = %key, status, "Upstream still unavailable, giving up");
                        return Err(RestError::Upstream { status, attempts: 2 });
                    }
                    upstream_retried = true;
                    let delay = inner.config.upstream_retry_delay;
                    warn!(bucket = %key, status, delay_ms = delay.as_millis() as u64, "Upstream unavailable, retrying once");
                    tokio::time::sleep(delay).await;
                }
                204 => {
                    return Ok(RestResponse { status, body: None });
                }
                s if s >= 400 => {
                    let text = response.text().await.unwrap_or_default();
                    let body = ApiErrorBody::from_text(&text);
                    debug!(bucket = %key, status, code = body.code, "Request rejected");
                    return Err(RestError::Api { status, body });
                }
                _ => {
                    let text = response.text().await?;
                    let body = if text.trim().is_empty() {
                        None
                    } else {
                        Some(
                            serde_json::from_str(&text)
                                .unwrap_or(serde_json::Value::String(text)),
                        )
                    };
                    return Ok(RestResponse { status, body });
                }
            }
        }
    }
}
