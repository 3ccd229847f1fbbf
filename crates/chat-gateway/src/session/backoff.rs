//! Reconnect backoff

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with up to 25% added jitter
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the given reconnect attempt, without jitter
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the given reconnect attempt
    ///
    /// The first attempt after a healthy connection goes out immediately.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = self.base_delay(attempt - 1);
        let jitter_ms = delay.as_millis() as u64 / 4;
        if jitter_ms == 0 {
            return delay;
        }
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        (delay + jitter).min(self.max)
    }
}
