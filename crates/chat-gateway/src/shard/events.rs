//! Lifecycle and dispatch events tagged with their shard

use crate::events::DispatchEvent;
use std::sync::Arc;

/// An event re-emitted by a session on the coordinator's channel
#[derive(Debug, Clone)]
pub struct ShardEvent {
    pub shard_id: u32,
    pub kind: ShardEventKind,
}

#[derive(Debug, Clone)]
pub enum ShardEventKind {
    /// Opening a socket
    Connecting,
    /// Socket open and Hello received
    Connected,
    /// New session established
    Ready { session_id: String },
    /// Previous session resumed
    Resumed,
    /// Socket lost; `resume` tells whether the next attempt resumes
    Reconnecting { resume: bool },
    /// Stopped; `reason` is set when the server ended the session
    Disconnected { reason: Option<String> },
    /// Closed with an unrecoverable code
    FatallyClosed { code: u16, reason: String },
    Dispatch(Arc<DispatchEvent>),
}

impl ShardEvent {
    #[must_use]
    pub fn new(shard_id: u32, kind: ShardEventKind) -> Self {
        Self { shard_id, kind }
    }

    /// Whether the shard finished its handshake
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.kind, ShardEventKind::Ready { .. } | ShardEventKind::Resumed)
    }

    /// Whether the shard stopped and will not reconnect on its own
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ShardEventKind::Disconnected { .. } | ShardEventKind::FatallyClosed { .. }
        )
    }
}

impl ShardEventKind {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready { .. } => "ready",
            Self::Resumed => "resumed",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disconnected { .. } => "disconnected",
            Self::FatallyClosed { .. } => "fatally_closed",
            Self::Dispatch(event) => event.name(),
        }
    }
}
