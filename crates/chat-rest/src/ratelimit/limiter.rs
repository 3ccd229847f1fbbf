//! Rate limiter shared by every request of a dispatcher
//!
//! Three pieces of shared state:
//! - a FIFO queue per route key, held for the whole life of a request so
//!   requests to one route go out in enqueue order;
//! - the route → bucket hash mapping learned from responses, which decides
//!   which bucket state a route consults and is replaced when the server
//!   migrates the route to a new hash;
//! - one global lock deadline, checked by every non-exempt request before
//!   each attempt.

use super::bucket::RateLimitBucket;
use super::headers::RateLimitHeaders;
use crate::routing::BucketKey;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Place in a route's FIFO queue; the next request proceeds when this drops
#[derive(Debug)]
pub struct RateLimitTicket {
    _guard: OwnedMutexGuard<()>,
}

/// Bucket bookkeeping for one dispatcher
#[derive(Debug, Default)]
pub struct RateLimiter {
    queues: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    hashes: DashMap<String, String>,
    buckets: DashMap<String, Arc<Mutex<RateLimitBucket>>>,
    global_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for this request's turn on its route
    pub async fn enqueue(&self, key: &BucketKey) -> RateLimitTicket {
        let queue = Arc::clone(&self.queues.entry(key.route().to_string()).or_default());
        RateLimitTicket {
            _guard: queue.lock_owned().await,
        }
    }

    /// Wait until neither the global lock nor the bucket holds the request,
    /// then take one unit of the bucket's budget
    pub async fn wait_ready(&self, key: &BucketKey, global_exempt: bool) {
        loop {
            let now = Instant::now();

            if !global_exempt {
                if let Some(wait) = self.global_wait(now) {
                    debug!(bucket = %key, wait_ms = wait.as_millis() as u64, "Held by global rate limit");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }

            let bucket = self.bucket_for(key);
            let wait = {
                let mut bucket = bucket.lock();
                let wait = bucket.wait_time(now);
                if wait.is_none() {
                    bucket.consume(now);
                }
                wait
            };

            match wait {
                Some(wait) => {
                    debug!(bucket = %key, wait_ms = wait.as_millis() as u64, "Bucket exhausted, holding request");
                    tokio::time::sleep(wait).await;
                }
                None => return,
            }
        }
    }

    /// Record the rate-limit state reported by a response
    pub fn update(&self, key: &BucketKey, headers: &RateLimitHeaders) {
        if let Some(hash) = &headers.bucket {
            let previous = self.hashes.insert(key.route().to_string(), hash.clone());
            if previous.as_deref() != Some(hash.as_str()) {
                debug!(
                    bucket = %key,
                    previous = previous.as_deref().unwrap_or("none"),
                    hash = %hash,
                    "Route mapped to new bucket hash"
                );
            }
        }

        if !headers.has_bucket_info() {
            return;
        }

        let bucket = self.bucket_for(key);
        let mut bucket = bucket.lock();
        bucket.update(headers, Instant::now(), epoch_secs());
        trace!(
            bucket = %key,
            remaining = ?bucket.remaining,
            limit = ?bucket.limit,
            "Bucket updated"
        );
    }

    /// Hold only this route's bucket after a route-scoped 429
    pub fn hold_bucket(&self, key: &BucketKey, duration: Duration) {
        self.bucket_for(key)
            .lock()
            .hold_until(Instant::now() + duration);
    }

    /// Hold every non-exempt request for `duration`
    pub fn lock_global(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut global = self.global_until.lock();
        *global = Some(global.map_or(until, |current| current.max(until)));
    }

    /// Remaining global lock time, if it is active
    pub fn global_wait(&self, now: Instant) -> Option<Duration> {
        self.global_until
            .lock()
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn is_global_locked(&self) -> bool {
        self.global_wait(Instant::now()).is_some()
    }

    /// Hash the route is currently tracked under
    pub fn hash_for(&self, key: &BucketKey) -> Option<String> {
        self.hashes.get(key.route()).map(|h| h.value().clone())
    }

    /// Copy of the state the route currently consults
    pub fn bucket_snapshot(&self, key: &BucketKey) -> RateLimitBucket {
        self.bucket_for(key).lock().clone()
    }

    /// Bucket state id: `hash:major` once the server has named the bucket,
    /// the route key until then
    fn state_id(&self, key: &BucketKey) -> String {
        match self.hashes.get(key.route()) {
            Some(hash) => format!("{}:{}", hash.value(), key.major()),
            None => key.route().to_string(),
        }
    }

    fn bucket_for(&self, key: &BucketKey) -> Arc<Mutex<RateLimitBucket>> {
        let id = self.state_id(key);
        Arc::clone(&self.buckets.entry(id).or_default())
    }
}

fn epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
