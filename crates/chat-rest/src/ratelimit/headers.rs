//! Rate-limit response header parsing

use reqwest::header::HeaderMap;
use std::time::Duration;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_SCOPE: &str = "x-ratelimit-scope";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Longest wait any server-reported value can impose
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Which limit a 429 was charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Per-route limit of this client
    User,
    /// Limit across all clients of this application
    Global,
    /// Per-resource limit shared with other clients
    Shared,
}

impl RateLimitScope {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "global" => Some(Self::Global),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// Rate-limit state reported by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Absolute reset time, Unix epoch seconds
    pub reset: Option<f64>,
    /// Seconds until reset, relative to the response
    pub reset_after: Option<f64>,
    /// Server-assigned bucket hash
    pub bucket: Option<String>,
    pub global: bool,
    pub scope: Option<RateLimitScope>,
    /// Seconds to wait before retrying (429 only)
    pub retry_after: Option<f64>,
}

impl RateLimitHeaders {
    /// Extract rate-limit headers; malformed values are treated as absent
    pub fn parse(headers: &HeaderMap) -> Self {
        Self {
            limit: number(headers, HEADER_LIMIT),
            remaining: number(headers, HEADER_REMAINING),
            reset: seconds(headers, HEADER_RESET),
            reset_after: seconds(headers, HEADER_RESET_AFTER),
            bucket: text(headers, HEADER_BUCKET).map(str::to_string),
            global: text(headers, HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            scope: text(headers, HEADER_SCOPE).and_then(RateLimitScope::parse),
            retry_after: seconds(headers, HEADER_RETRY_AFTER),
        }
    }

    /// Whether any bucket information was present
    pub fn has_bucket_info(&self) -> bool {
        self.remaining.is_some() || self.bucket.is_some()
    }

    /// Time until the bucket resets, measured from `now_epoch_secs`
    ///
    /// The absolute reset is authoritative; the relative value is only a fallback.
    pub fn reset_in(&self, now_epoch_secs: f64) -> Option<Duration> {
        let secs = match (self.reset, self.reset_after) {
            (Some(reset), _) => reset - now_epoch_secs,
            (None, Some(after)) => after,
            (None, None) => return None,
        };
        Some(wait_duration(secs))
    }
}

/// Convert server-reported seconds to a wait, clamped to `0..=MAX_RATE_LIMIT_WAIT`
pub fn wait_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(MAX_RATE_LIMIT_WAIT, |d| d.min(MAX_RATE_LIMIT_WAIT))
}

fn text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    let value = text(headers, name)?;
    match value.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(header = name, value, "Ignoring malformed rate-limit header");
            None
        }
    }
}

fn seconds(headers: &HeaderMap, name: &str) -> Option<f64> {
    let value = number::<f64>(headers, name)?;
    if value.is_finite() {
        Some(value)
    } else {
        tracing::warn!(header = name, value, "Ignoring non-finite rate-limit header");
        None
    }
}
