//! WebSocket close codes
//!
//! Every close frame the session receives is classified into a
//! [`CloseAction`] that decides what the state machine does next.

/// Close code sent by the client when it does not intend to resume
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent by the client when it will reconnect and resume
pub const CLOSE_RESUMABLE: u16 = 4000;

/// Gateway-specific close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    UnknownError = 4000,
    UnknownOpcode = 4001,
    DecodeError = 4002,
    NotAuthenticated = 4003,
    AuthenticationFailed = 4004,
    AlreadyAuthenticated = 4005,
    InvalidSequence = 4007,
    RateLimited = 4008,
    SessionTimedOut = 4009,
    InvalidShard = 4010,
    ShardingRequired = 4011,
    InvalidApiVersion = 4012,
    InvalidIntents = 4013,
    DisallowedIntents = 4014,
}

/// What the session does after a close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the existing session
    Resume,
    /// Reconnect with a fresh Identify; the session cannot be resumed
    Reidentify,
    /// Stop and report; the configuration must change before retrying
    Invalidate,
    /// Stop permanently
    Fatal,
}

impl CloseCode {
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4004 => Some(Self::AuthenticationFailed),
            4005 => Some(Self::AlreadyAuthenticated),
            4007 => Some(Self::InvalidSequence),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimedOut),
            4010 => Some(Self::InvalidShard),
            4011 => Some(Self::ShardingRequired),
            4012 => Some(Self::InvalidApiVersion),
            4013 => Some(Self::InvalidIntents),
            4014 => Some(Self::DisallowedIntents),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn action(self) -> CloseAction {
        match self {
            Self::UnknownError
            | Self::UnknownOpcode
            | Self::DecodeError
            | Self::NotAuthenticated
            | Self::AlreadyAuthenticated
            | Self::RateLimited => CloseAction::Resume,
            Self::InvalidSequence | Self::SessionTimedOut => CloseAction::Reidentify,
            Self::InvalidShard
            | Self::ShardingRequired
            | Self::InvalidIntents
            | Self::DisallowedIntents => CloseAction::Invalidate,
            Self::AuthenticationFailed | Self::InvalidApiVersion => CloseAction::Fatal,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error",
            Self::UnknownOpcode => "Unknown opcode sent",
            Self::DecodeError => "Invalid payload sent",
            Self::NotAuthenticated => "Payload sent before identifying",
            Self::AuthenticationFailed => "Invalid token",
            Self::AlreadyAuthenticated => "Identify sent more than once",
            Self::InvalidSequence => "Invalid resume sequence",
            Self::RateLimited => "Payloads sent too quickly",
            Self::SessionTimedOut => "Session timed out",
            Self::InvalidShard => "Invalid shard",
            Self::ShardingRequired => "Sharding required",
            Self::InvalidApiVersion => "Invalid API version",
            Self::InvalidIntents => "Invalid intents",
            Self::DisallowedIntents => "Intents not enabled for this application",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Classify any raw close code, including transport-level ones
///
/// Codes outside the gateway range (going away, abnormal closure, server
/// error) and unassigned gateway codes leave the session intact and are resumed.
#[must_use]
pub fn classify(code: u16) -> CloseAction {
    CloseCode::from_u16(code).map_or(CloseAction::Resume, CloseCode::action)
}
