//! Per-bucket rate-limit state

use super::headers::RateLimitHeaders;
use std::time::Duration;
use tokio::time::Instant;

/// Remaining budget and reset time for one server-side bucket
///
/// A fresh bucket knows nothing and never holds requests; the first
/// response fills it in.
#[derive(Debug, Clone, Default)]
pub struct RateLimitBucket {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<Instant>,
    /// Server-assigned hash this state was last reported under
    pub hash: Option<String>,
}

impl RateLimitBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a request must wait before this bucket has budget
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if reset_at > now => Some(reset_at - now),
            _ => None,
        }
    }

    pub fn is_exhausted(&self, now: Instant) -> bool {
        self.wait_time(now).is_some()
    }

    /// Take one unit of budget for a request about to be sent
    pub fn consume(&mut self, now: Instant) {
        if self.reset_at.is_some_and(|reset_at| reset_at <= now) {
            self.remaining = self.limit;
            self.reset_at = None;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }

    /// Apply the state reported by a response
    pub fn update(&mut self, headers: &RateLimitHeaders, now: Instant, now_epoch_secs: f64) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_in) = headers.reset_in(now_epoch_secs) {
            self.reset_at = Some(now + reset_in);
        }
        if let Some(hash) = &headers.bucket {
            self.hash = Some(hash.clone());
        }
    }

    /// Block the bucket until `until` after a route-scoped 429
    pub fn hold_until(&mut self, until: Instant) {
        self.remaining = Some(0);
        self.reset_at = Some(self.reset_at.map_or(until, |current| current.max(until)));
    }
}
