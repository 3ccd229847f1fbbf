//! Gateway message envelope
//!
//! Every frame, in both directions, is `{op, d, s?, t?}`.

use super::{
    HelloPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, RequestGuildMembersPayload,
    ResumePayload, VoiceStateUpdatePayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: OpCode,

    /// Event name (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Sequence number (Dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Payload; always present on the wire, `null` when empty
    #[serde(default)]
    pub d: Value,
}

impl GatewayMessage {
    fn new<T: Serialize>(op: OpCode, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op,
            t: None,
            s: None,
            d: serde_json::to_value(payload)?,
        })
    }

    // === Sent by the client ===

    /// Heartbeat (op 1) carrying the last sequence received
    #[must_use]
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OpCode::Heartbeat,
            t: None,
            s: None,
            d: last_sequence.map_or(Value::Null, Value::from),
        }
    }

    pub fn identify(payload: &IdentifyPayload) -> Result<Self, serde_json::Error> {
        Self::new(OpCode::Identify, payload)
    }

    pub fn resume(payload: &ResumePayload) -> Result<Self, serde_json::Error> {
        Self::new(OpCode::Resume, payload)
    }

    pub fn presence_update(payload: &PresenceUpdatePayload) -> Result<Self, serde_json::Error> {
        Self::new(OpCode::PresenceUpdate, payload)
    }

    pub fn request_guild_members(
        payload: &RequestGuildMembersPayload,
    ) -> Result<Self, serde_json::Error> {
        Self::new(OpCode::RequestGuildMembers, payload)
    }

    pub fn voice_state_update(
        payload: &VoiceStateUpdatePayload,
    ) -> Result<Self, serde_json::Error> {
        Self::new(OpCode::VoiceStateUpdate, payload)
    }

    // === Sent by the server ===

    #[must_use]
    pub fn dispatch(event_type: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.into()),
            s: Some(sequence),
            d: data,
        }
    }

    #[must_use]
    pub fn hello(heartbeat_interval: u64) -> Self {
        Self {
            op: OpCode::Hello,
            t: None,
            s: None,
            d: serde_json::json!({ "heartbeat_interval": heartbeat_interval }),
        }
    }

    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self {
            op: OpCode::HeartbeatAck,
            t: None,
            s: None,
            d: Value::Null,
        }
    }

    #[must_use]
    pub fn reconnect() -> Self {
        Self {
            op: OpCode::Reconnect,
            t: None,
            s: None,
            d: Value::Null,
        }
    }

    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self {
            op: OpCode::InvalidSession,
            t: None,
            s: None,
            d: Value::Bool(resumable),
        }
    }

    // === Inspection ===

    /// Parse a Hello payload (op 10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        serde_json::from_value(self.d.clone()).ok()
    }

    /// Whether an InvalidSession (op 9) is resumable
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_bool().unwrap_or(false))
    }

    /// Sequence carried by a client heartbeat (op 1)
    pub fn as_heartbeat_seq(&self) -> Option<Option<u64>> {
        if self.op != OpCode::Heartbeat {
            return None;
        }
        Some(self.d.as_u64())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.t, self.s) {
            (Some(t), Some(s)) => write!(f, "GatewayMessage(op={}, t={t}, s={s})", self.op),
            (Some(t), None) => write!(f, "GatewayMessage(op={}, t={t})", self.op),
            _ => write!(f, "GatewayMessage(op={})", self.op),
        }
    }
}
