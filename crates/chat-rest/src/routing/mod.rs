//! Route normalization for rate-limit bucketing

mod bucket_key;

pub use bucket_key::{is_global_exempt, BucketKey};
