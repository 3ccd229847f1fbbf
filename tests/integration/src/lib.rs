//! Integration test utilities for the gateway client
//!
//! Provides an in-process mock of the HTTP API with scripted rate-limit
//! responses and a mock gateway that plays a script per connection.

pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
