//! Sharding
//!
//! Running many sessions of one bot and aggregating their events.

mod coordinator;
mod events;

pub use coordinator::{CoordinatorConfig, ShardCoordinator, ShardStartError, StartReport};
pub use events::{ShardEvent, ShardEventKind};
