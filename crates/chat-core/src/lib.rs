//! # chat-core
//!
//! Protocol value types shared by the REST and gateway clients: snowflake
//! identifiers, permission bits, and gateway intents.
//! This crate has zero dependencies on I/O (HTTP, WebSocket, runtime).

pub mod value_objects;

// Re-export commonly used types at crate root
pub use value_objects::{Intents, Permissions, Snowflake, SnowflakeParseError};
