//! Gateway protocol definitions
//!
//! Op codes, close codes, the frame envelope, and the payloads of the
//! non-dispatch op codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{classify, CloseAction, CloseCode, CLOSE_NORMAL, CLOSE_RESUMABLE};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    Activity, HelloPayload, IdentifyPayload, IdentifyProperties, PresenceUpdatePayload,
    RequestGuildMembersPayload, ResumePayload, Status, VoiceStateUpdatePayload,
};
