//! Rate-limit bucket key derivation
//!
//! Requests to the same logical route share a bucket key regardless of the
//! concrete ids in the path, except for the route's major parameter
//! (`channels/{id}`, `guilds/{id}`, `webhooks/{id}/{token}`), which the
//! platform buckets separately.

use chat_core::Snowflake;
use reqwest::Method;
use std::fmt;

/// Resources whose first id is a major parameter
const MAJOR_RESOURCES: &[&str] = &["channels", "guilds", "webhooks"];

/// Message deletions older than this are bucketed separately
const OLD_MESSAGE_AGE_MS: i64 = 14 * 24 * 60 * 60 * 1000;

/// Identity of the rate-limit bucket a request is queued under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Method plus normalized path, e.g. `GET /channels/123/messages/:id`
    route: String,
    /// Literal major parameter, e.g. `channels/123`; `global` when the route has none
    major: String,
}

impl BucketKey {
    /// Derive the key for a request
    pub fn new(method: &Method, path: &str) -> Self {
        Self::at(method, path, chrono::Utc::now().timestamp_millis())
    }

    /// Derive the key as of `now_ms` (Unix epoch milliseconds)
    pub fn at(method: &Method, path: &str, now_ms: i64) -> Self {
        let segments = split_path(path);
        let mut major = String::from("global");
        let mut normalized: Vec<&str> = Vec::with_capacity(segments.len());

        for (i, seg) in segments.iter().enumerate() {
            let root = segments[0];
            if i == 1 && MAJOR_RESOURCES.contains(&root) {
                major = format!("{root}/{seg}");
                normalized.push(seg);
            } else if i == 2 && root == "webhooks" {
                // Token is part of the major parameter but stays out of the printable route
                major = format!("{major}/{seg}");
                normalized.push(":token");
            } else if i == 2 && root == "interactions" {
                normalized.push(":token");
            } else if i > 0 && segments[i - 1] == "reactions" {
                // Every reaction route on a message shares one bucket
                normalized.push(":reaction");
                break;
            } else if is_id(seg) {
                normalized.push(":id");
            } else {
                normalized.push(seg);
            }
        }

        let mut route = format!("{} /{}", method.as_str(), normalized.join("/"));
        if *method == Method::DELETE && is_old_message(&segments, now_ms) {
            route.push_str("/delete-old");
        }

        Self { route, major }
    }

    /// Printable route key
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Major parameter the server scopes bucket hashes by
    pub fn major(&self) -> &str {
        &self.major
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.route)
    }
}

/// Routes that are not subject to the global rate limit
pub fn is_global_exempt(path: &str) -> bool {
    let segments = split_path(path);
    match segments.first() {
        Some(&"interactions") => segments.last() == Some(&"callback"),
        Some(&"webhooks") => segments.len() >= 3,
        _ => false,
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let path = path.split('?').next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_old_message(segments: &[&str], now_ms: i64) -> bool {
    let [channels, _, messages, id] = segments else {
        return false;
    };
    if *channels != "channels" || *messages != "messages" {
        return false;
    }
    Snowflake::parse(id)
        .map(|id| now_ms - id.timestamp() as i64 > OLD_MESSAGE_AGE_MS)
        .unwrap_or(false)
}
