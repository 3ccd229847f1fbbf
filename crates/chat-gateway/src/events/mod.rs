//! Gateway events
//!
//! Dispatch event names, typed payloads, and the decoder between them.

mod event;
mod event_types;
mod payloads;

pub use event::DispatchEvent;
pub use event_types::GatewayEventType;
pub use payloads::{
    Attachment, Channel, Emoji, Guild, GuildMemberEvent, GuildMemberRemoveEvent,
    GuildMembersChunkEvent, Interaction, Member, Message, MessageDeleteBulkEvent,
    MessageDeleteEvent, MessageReference, MessageUpdateEvent, PartialApplication,
    PresenceUpdateEvent, ReactionEvent, ReadyEvent, ResumedEvent, Role, TypingStartEvent,
    UnavailableGuild, User, UserRef, VoiceState,
};
