//! Typed dispatch events
//!
//! Maps `(t, d)` pairs to typed payloads. Decoding is a pure function; the
//! dispatcher runs it once per frame before fanning out to handlers.

use super::event_types::GatewayEventType;
use super::payloads::{
    Channel, Guild, GuildMemberEvent, GuildMemberRemoveEvent, GuildMembersChunkEvent, Interaction,
    Message, MessageDeleteBulkEvent, MessageDeleteEvent, MessageUpdateEvent, PresenceUpdateEvent,
    ReactionEvent, ReadyEvent, ResumedEvent, TypingStartEvent, UnavailableGuild, User, VoiceState,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded dispatch event
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Ready(Box<ReadyEvent>),
    Resumed(ResumedEvent),
    GuildCreate(Box<Guild>),
    GuildUpdate(Box<Guild>),
    GuildDelete(UnavailableGuild),
    GuildMemberAdd(Box<GuildMemberEvent>),
    GuildMemberUpdate(Box<GuildMemberEvent>),
    GuildMemberRemove(GuildMemberRemoveEvent),
    GuildMembersChunk(Box<GuildMembersChunkEvent>),
    ChannelCreate(Box<Channel>),
    ChannelUpdate(Box<Channel>),
    ChannelDelete(Box<Channel>),
    MessageCreate(Box<Message>),
    MessageUpdate(Box<MessageUpdateEvent>),
    MessageDelete(MessageDeleteEvent),
    MessageDeleteBulk(MessageDeleteBulkEvent),
    MessageReactionAdd(Box<ReactionEvent>),
    MessageReactionRemove(Box<ReactionEvent>),
    PresenceUpdate(Box<PresenceUpdateEvent>),
    TypingStart(TypingStartEvent),
    UserUpdate(Box<User>),
    VoiceStateUpdate(Box<VoiceState>),
    InteractionCreate(Box<Interaction>),
    /// An event this client has no typed model for
    Unknown { name: String, data: Value },
}

fn typed<T: DeserializeOwned>(data: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}

fn boxed<T: DeserializeOwned>(data: Value) -> Result<Box<T>, serde_json::Error> {
    serde_json::from_value(data).map(Box::new)
}

impl DispatchEvent {
    /// Decode the payload of a dispatch named `name`
    ///
    /// Unknown names decode to [`DispatchEvent::Unknown`] and never fail.
    pub fn decode(name: &str, data: Value) -> Result<Self, serde_json::Error> {
        let Some(kind) = GatewayEventType::parse(name) else {
            return Ok(Self::Unknown {
                name: name.to_string(),
                data,
            });
        };

        let event = match kind {
            GatewayEventType::Ready => Self::Ready(boxed(data)?),
            GatewayEventType::Resumed => {
                // RESUMED may carry `null` or an object with trace fields
                Self::Resumed(typed(data).unwrap_or_default())
            }
            GatewayEventType::GuildCreate => Self::GuildCreate(boxed(data)?),
            GatewayEventType::GuildUpdate => Self::GuildUpdate(boxed(data)?),
            GatewayEventType::GuildDelete => Self::GuildDelete(typed(data)?),
            GatewayEventType::GuildMemberAdd => Self::GuildMemberAdd(boxed(data)?),
            GatewayEventType::GuildMemberUpdate => Self::GuildMemberUpdate(boxed(data)?),
            GatewayEventType::GuildMemberRemove => Self::GuildMemberRemove(typed(data)?),
            GatewayEventType::GuildMembersChunk => Self::GuildMembersChunk(boxed(data)?),
            GatewayEventType::ChannelCreate => Self::ChannelCreate(boxed(data)?),
            GatewayEventType::ChannelUpdate => Self::ChannelUpdate(boxed(data)?),
            GatewayEventType::ChannelDelete => Self::ChannelDelete(boxed(data)?),
            GatewayEventType::MessageCreate => Self::MessageCreate(boxed(data)?),
            GatewayEventType::MessageUpdate => Self::MessageUpdate(boxed(data)?),
            GatewayEventType::MessageDelete => Self::MessageDelete(typed(data)?),
            GatewayEventType::MessageDeleteBulk => Self::MessageDeleteBulk(typed(data)?),
            GatewayEventType::MessageReactionAdd => Self::MessageReactionAdd(boxed(data)?),
            GatewayEventType::MessageReactionRemove => Self::MessageReactionRemove(boxed(data)?),
            GatewayEventType::PresenceUpdate => Self::PresenceUpdate(boxed(data)?),
            GatewayEventType::TypingStart => Self::TypingStart(typed(data)?),
            GatewayEventType::UserUpdate => Self::UserUpdate(boxed(data)?),
            GatewayEventType::VoiceStateUpdate => Self::VoiceStateUpdate(boxed(data)?),
            GatewayEventType::InteractionCreate => Self::InteractionCreate(boxed(data)?),
        };
        Ok(event)
    }

    /// Event name as sent in `t`
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown { name, .. } => name,
            other => other.kind().map_or("", GatewayEventType::as_str),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<GatewayEventType> {
        let kind = match self {
            Self::Ready(_) => GatewayEventType::Ready,
            Self::Resumed(_) => GatewayEventType::Resumed,
            Self::GuildCreate(_) => GatewayEventType::GuildCreate,
            Self::GuildUpdate(_) => GatewayEventType::GuildUpdate,
            Self::GuildDelete(_) => GatewayEventType::GuildDelete,
            Self::GuildMemberAdd(_) => GatewayEventType::GuildMemberAdd,
            Self::GuildMemberUpdate(_) => GatewayEventType::GuildMemberUpdate,
            Self::GuildMemberRemove(_) => GatewayEventType::GuildMemberRemove,
            Self::GuildMembersChunk(_) => GatewayEventType::GuildMembersChunk,
            Self::ChannelCreate(_) => GatewayEventType::ChannelCreate,
            Self::ChannelUpdate(_) => GatewayEventType::ChannelUpdate,
            Self::ChannelDelete(_) => GatewayEventType::ChannelDelete,
            Self::MessageCreate(_) => GatewayEventType::MessageCreate,
            Self::MessageUpdate(_) => GatewayEventType::MessageUpdate,
            Self::MessageDelete(_) => GatewayEventType::MessageDelete,
            Self::MessageDeleteBulk(_) => GatewayEventType::MessageDeleteBulk,
            Self::MessageReactionAdd(_) => GatewayEventType::MessageReactionAdd,
            Self::MessageReactionRemove(_) => GatewayEventType::MessageReactionRemove,
            Self::PresenceUpdate(_) => GatewayEventType::PresenceUpdate,
            Self::TypingStart(_) => GatewayEventType::TypingStart,
            Self::UserUpdate(_) => GatewayEventType::UserUpdate,
            Self::VoiceStateUpdate(_) => GatewayEventType::VoiceStateUpdate,
            Self::InteractionCreate(_) => GatewayEventType::InteractionCreate,
            Self::Unknown { .. } => return None,
        };
        Some(kind)
    }

    /// Guild the event belongs to, if any
    #[must_use]
    pub fn guild_id(&self) -> Option<chat_core::Snowflake> {
        match self {
            Self::GuildCreate(guild) | Self::GuildUpdate(guild) => Some(guild.id),
            Self::GuildDelete(guild) => Some(guild.id),
            Self::GuildMemberAdd(event) | Self::GuildMemberUpdate(event) => Some(event.guild_id),
            Self::GuildMemberRemove(event) => Some(event.guild_id),
            Self::GuildMembersChunk(event) => Some(event.guild_id),
            Self::ChannelCreate(channel)
            | Self::ChannelUpdate(channel)
            | Self::ChannelDelete(channel) => channel.guild_id,
            Self::MessageCreate(message) => message.guild_id,
            Self::MessageUpdate(event) => event.guild_id,
            Self::MessageDelete(event) => event.guild_id,
            Self::MessageDeleteBulk(event) => event.guild_id,
            Self::MessageReactionAdd(event) | Self::MessageReactionRemove(event) => event.guild_id,
            Self::PresenceUpdate(event) => event.guild_id,
            Self::TypingStart(event) => event.guild_id,
            Self::VoiceStateUpdate(state) => state.guild_id,
            Self::InteractionCreate(interaction) => interaction.guild_id,
            Self::Ready(_) | Self::Resumed(_) | Self::UserUpdate(_) | Self::Unknown { .. } => None,
        }
    }
}
