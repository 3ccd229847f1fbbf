//! # chat-gateway
//!
//! Sharded WebSocket client for the real-time event gateway.
//!
//! ## Features
//!
//! - Session lifecycle: Hello, Identify, Resume and Reconnect with backoff
//! - Heartbeating with zombie-connection detection
//! - Typed dispatch events routed to registered handlers
//! - Shard coordination honoring the session start limit and identify concurrency
//!
//! ## Example
//!
//! ```ignore
//! use chat_common::ClientConfig;
//! use chat_gateway::{CoordinatorConfig, HandlerRegistry, ShardCoordinator};
//! use chat_rest::RestDispatcher;
//!
//! let config = ClientConfig::from_env()?;
//! let rest = RestDispatcher::from_config(&config)?;
//! let registry = HandlerRegistry::builder()
//!     .on("MESSAGE_CREATE", |ctx, event| async move {
//!         tracing::info!(shard_id = ctx.shard_id, event = event.name(), "message");
//!     })
//!     .build();
//!
//! let mut coordinator = ShardCoordinator::new(CoordinatorConfig::from(&config), rest, registry);
//! let report = coordinator.connect().await?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod protocol;
pub mod session;
pub mod shard;

pub use dispatcher::{EventContext, EventDispatcher, EventHandler, HandlerRegistry};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, GatewayEventType};
pub use heartbeat::{HeartbeatEvent, HeartbeatMonitor};
pub use protocol::{GatewayMessage, OpCode};
pub use session::{GatewaySession, SessionConfig, SessionState};
pub use shard::{
    CoordinatorConfig, ShardCoordinator, ShardEvent, ShardEventKind, ShardStartError, StartReport,
};
