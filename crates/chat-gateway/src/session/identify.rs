//! Identify pacing
//!
//! The gateway accepts one Identify per rate-limit key every five seconds,
//! where the key is `shard_id % max_concurrency`. Sessions reserve a slot
//! and wait for it inside their event loop, so heartbeats keep flowing
//! while they wait.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Identify slots shared by all sessions of one bot
#[derive(Debug)]
pub struct IdentifyLimiter {
    max_concurrency: u32,
    interval: Duration,
    next_slot: Mutex<HashMap<u32, Instant>>,
}

impl IdentifyLimiter {
    #[must_use]
    pub fn new(max_concurrency: u32, interval: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }

    #[must_use]
    pub fn key_for(&self, shard_id: u32) -> u32 {
        shard_id % self.max_concurrency
    }

    /// Reserve the next Identify slot for `shard_id`
    pub fn reserve(&self, shard_id: u32) -> Instant {
        self.reserve_after(shard_id, Instant::now())
    }

    /// Reserve the first slot for `shard_id` that is not before `earliest`
    pub fn reserve_after(&self, shard_id: u32, earliest: Instant) -> Instant {
        let key = self.key_for(shard_id);
        let mut slots = self.next_slot.lock();
        let slot = slots
            .get(&key)
            .map_or(earliest, |next| (*next).max(earliest));
        slots.insert(key, slot + self.interval);

        tracing::trace!(
            shard_id,
            key,
            wait_ms = slot.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Identify slot reserved"
        );
        slot
    }
}

impl Default for IdentifyLimiter {
    fn default() -> Self {
        Self::new(1, DEFAULT_IDENTIFY_INTERVAL)
    }
}
