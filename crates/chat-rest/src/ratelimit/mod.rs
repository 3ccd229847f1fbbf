//! Bucket tracking, global lock and response header parsing

mod bucket;
mod headers;
mod limiter;

pub use bucket::RateLimitBucket;
pub use headers::{wait_duration, RateLimitHeaders, RateLimitScope, MAX_RATE_LIMIT_WAIT};
pub use limiter::{RateLimitTicket, RateLimiter};
