//! Events emitted to registered handlers.

use serde_json::{json, Value};

use crate::types::{
    Channel, Message, MessageDeletePayload, MessageEditPayload, OnlineStatus, Role, Server,
    TypingPayload, User, VoiceState,
};

/// An event raised on the bus after a gateway frame is dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session finished authenticating and the cache was rebuilt.
    Ready,

    GuildCreate(Server),
    GuildUpdate(Server),
    GuildDelete { server_id: u64 },

    MemberAdd { server_id: u64, user: User },
    MemberUpdate { server_id: u64, user: User, roles: Vec<u64> },
    MemberRemove { server_id: u64, user: User },

    RoleCreate { server_id: u64, role: Role },
    RoleUpdate { server_id: u64, role: Role },
    RoleDelete { server_id: u64, role_id: u64 },

    Ban { server_id: u64, user: User },
    Unban { server_id: u64, user: User },

    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),

    /// A message arrived in any visible channel.
    Message(Message),
    /// A message arrived that mentions the bot. Raised after [`Event::Message`].
    Mention(Message),
    /// A message arrived in a private channel. Raised after [`Event::Mention`].
    PrivateMessage(Message),

    MessageEdit(MessageEditPayload),
    MessageDelete(MessageDeletePayload),

    Typing(TypingPayload),

    /// A user's game changed.
    Playing { user_id: u64, game: Option<String> },
    /// A user's presence changed without a game change.
    Presence { user_id: u64, status: OnlineStatus },

    VoiceStateUpdate { server_id: Option<u64>, user_id: u64, state: VoiceState },
}

/// Event kind, used as the registration key for handlers and awaits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    MemberAdd,
    MemberUpdate,
    MemberRemove,
    RoleCreate,
    RoleUpdate,
    RoleDelete,
    Ban,
    Unban,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    Message,
    Mention,
    PrivateMessage,
    MessageEdit,
    MessageDelete,
    Typing,
    Playing,
    Presence,
    VoiceStateUpdate,
}

impl Event {
    /// The kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::GuildCreate(_) => EventKind::GuildCreate,
            Self::GuildUpdate(_) => EventKind::GuildUpdate,
            Self::GuildDelete { .. } => EventKind::GuildDelete,
            Self::MemberAdd { .. } => EventKind::MemberAdd,
            Self::MemberUpdate { .. } => EventKind::MemberUpdate,
            Self::MemberRemove { .. } => EventKind::MemberRemove,
            Self::RoleCreate { .. } => EventKind::RoleCreate,
            Self::RoleUpdate { .. } => EventKind::RoleUpdate,
            Self::RoleDelete { .. } => EventKind::RoleDelete,
            Self::Ban { .. } => EventKind::Ban,
            Self::Unban { .. } => EventKind::Unban,
            Self::ChannelCreate(_) => EventKind::ChannelCreate,
            Self::ChannelUpdate(_) => EventKind::ChannelUpdate,
            Self::ChannelDelete(_) => EventKind::ChannelDelete,
            Self::Message(_) => EventKind::Message,
            Self::Mention(_) => EventKind::Mention,
            Self::PrivateMessage(_) => EventKind::PrivateMessage,
            Self::MessageEdit(_) => EventKind::MessageEdit,
            Self::MessageDelete(_) => EventKind::MessageDelete,
            Self::Typing(_) => EventKind::Typing,
            Self::Playing { .. } => EventKind::Playing,
            Self::Presence { .. } => EventKind::Presence,
            Self::VoiceStateUpdate { .. } => EventKind::VoiceStateUpdate,
        }
    }

    /// Attributes an await filter can match against. Ids appear as JSON
    /// numbers, names and content as strings.
    #[must_use]
    pub fn attributes(&self) -> Value {
        match self {
            Self::Ready => json!({}),
            Self::GuildCreate(s) | Self::GuildUpdate(s) => {
                json!({ "server_id": s.id, "name": s.name })
            }
            Self::GuildDelete { server_id } => json!({ "server_id": server_id }),
            Self::MemberAdd { server_id, user }
            | Self::MemberRemove { server_id, user }
            | Self::Ban { server_id, user }
            | Self::Unban { server_id, user } => {
                json!({ "server_id": server_id, "user_id": user.id, "username": user.username })
            }
            Self::MemberUpdate { server_id, user, .. } => {
                json!({ "server_id": server_id, "user_id": user.id, "username": user.username })
            }
            Self::RoleCreate { server_id, role } | Self::RoleUpdate { server_id, role } => {
                json!({ "server_id": server_id, "role_id": role.id, "name": role.name })
            }
            Self::RoleDelete { server_id, role_id } => {
                json!({ "server_id": server_id, "role_id": role_id })
            }
            Self::ChannelCreate(c) | Self::ChannelUpdate(c) | Self::ChannelDelete(c) => {
                json!({ "channel_id": c.id, "name": c.name, "server_id": c.server_id })
            }
            Self::Message(m) | Self::Mention(m) | Self::PrivateMessage(m) => json!({
                "message_id": m.id,
                "channel_id": m.channel_id,
                "author_id": m.author.id,
                "author": m.author.username,
                "content": m.content,
                "tts": m.tts,
            }),
            Self::MessageEdit(e) => {
                json!({ "message_id": e.id, "channel_id": e.channel_id, "content": e.content })
            }
            Self::MessageDelete(d) => {
                json!({ "message_id": d.id, "channel_id": d.channel_id })
            }
            Self::Typing(t) => json!({ "channel_id": t.channel_id, "user_id": t.user_id }),
            Self::Playing { user_id, game } => json!({ "user_id": user_id, "game": game }),
            Self::Presence { user_id, status } => {
                json!({ "user_id": user_id, "status": status })
            }
            Self::VoiceStateUpdate { server_id, user_id, state } => json!({
                "server_id": server_id,
                "user_id": user_id,
                "channel_id": state.channel_id,
            }),
        }
    }
}
