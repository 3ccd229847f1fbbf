//! Session connection state

use std::fmt;

/// Connection state of one gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    /// Opening the socket or waiting for Hello
    Connecting,
    /// Identify sent, waiting for READY
    Identifying,
    /// Resume sent, waiting for RESUMED
    Resuming,
    /// READY or RESUMED received
    Connected,
    /// Socket lost; waiting to reconnect
    Reconnecting,
    /// Closed with an unrecoverable code; never reconnects
    FatallyClosed,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::FatallyClosed => "fatally_closed",
        }
    }

    /// States in which the driver task is not running
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Disconnected | Self::FatallyClosed)
    }

    /// Handshake sent and not yet answered
    #[must_use]
    pub const fn is_handshaking(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
