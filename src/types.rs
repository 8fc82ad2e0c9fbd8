//! Wire and entity types.
//!
//! All identifiers are 64-bit unsigned integers carried as decimal
//! strings on the wire; the [`snowflake`] helper modules parse them into
//! `u64` on the way in and render them back on the way out.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Serde helpers for string-encoded 64-bit ids.
pub mod snowflake {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    fn parse<E: serde::de::Error>(raw: Raw) -> Result<u64, E> {
        match raw {
            Raw::Str(s) => s.parse().map_err(|_| E::custom("invalid snowflake")),
            Raw::Num(n) => Ok(n),
        }
    }

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        parse(Raw::deserialize(deserializer)?)
    }

    /// `Option<u64>` variant.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::{parse, Raw};

        pub fn serialize<S: Serializer>(
            id: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.serialize_str(&id.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(parse)
                .transpose()
        }
    }

    /// `Vec<u64>` variant.
    pub mod vec {
        use serde::{Deserialize, Deserializer, Serializer};

        use super::{parse, Raw};

        pub fn serialize<S: Serializer>(ids: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(ids.iter().map(u64::to_string))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<u64>, D::Error> {
            Vec::<Raw>::deserialize(deserializer)?
                .into_iter()
                .map(parse)
                .collect()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────────────────────

/// Online status as reported by presence updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Idle,
    #[default]
    Offline,
    Dnd,
}

/// A Discord user.
///
/// The presence fields (`status`, `game`) and the per-server role map are
/// maintained by the cache, not the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(with = "snowflake")]
    pub id: u64,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,

    /// Avatar hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default)]
    pub bot: bool,

    #[serde(default)]
    pub status: OnlineStatus,

    /// Name of the game the user is currently playing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,

    /// Server id → set of role ids held on that server.
    #[serde(skip)]
    pub roles: HashMap<u64, HashSet<u64>>,
}

impl User {
    /// A placeholder for an id an event referenced before any full user
    /// object was seen.
    #[must_use]
    pub fn unknown(id: u64) -> Self {
        Self {
            id,
            username: String::new(),
            discriminator: None,
            avatar: None,
            bot: false,
            status: OnlineStatus::Offline,
            game: None,
            roles: HashMap::new(),
        }
    }
}

/// A role on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    #[serde(with = "snowflake")]
    pub id: u64,

    pub name: String,

    #[serde(default)]
    pub color: u32,

    #[serde(default)]
    pub hoist: bool,

    #[serde(default)]
    pub position: i64,

    /// 53-bit permission bitmask.
    #[serde(default)]
    pub permissions: u64,
}

/// Channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Text,
    Voice,
    Private,
}

/// Permission overwrite attached to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionOverwrite {
    #[serde(with = "snowflake")]
    pub id: u64,

    /// `"role"` or `"member"`.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub allow: u64,

    #[serde(default)]
    pub deny: u64,
}

/// A text, voice, or private channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: ChannelKind,

    /// Parent server; `None` for private channels.
    #[serde(
        default,
        rename = "guild_id",
        with = "snowflake::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub server_id: Option<u64>,

    #[serde(default)]
    pub position: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default)]
    pub is_private: bool,

    /// The other party, for private channels only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<User>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

impl Channel {
    /// Whether this is a private (direct-message) channel.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.is_private || self.kind == ChannelKind::Private
    }
}

/// Voice state of one user on one server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceState {
    #[serde(
        default,
        with = "snowflake::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub channel_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default)]
    pub mute: bool,

    #[serde(default)]
    pub deaf: bool,

    #[serde(default)]
    pub self_mute: bool,

    #[serde(default)]
    pub self_deaf: bool,
}

/// A file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(with = "snowflake")]
    pub id: u64,

    pub filename: String,

    #[serde(default)]
    pub size: u64,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// A chat message. Messages are not cached; this is the dispatch and
/// REST-response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(with = "snowflake")]
    pub channel_id: u64,

    pub author: User,

    pub content: String,

    pub timestamp: String,

    #[serde(default)]
    pub tts: bool,

    #[serde(default)]
    pub mentions: Vec<User>,

    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Whether the given user id appears in the mention list.
    #[must_use]
    pub fn mentions_user(&self, id: u64) -> bool {
        self.mentions.iter().any(|u| u.id == id)
    }
}

/// Server (guild) summary embedded in an invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteServer {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(default)]
    pub name: Option<String>,
}

/// Channel summary embedded in an invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteChannel {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(default)]
    pub name: Option<String>,
}

/// An instant invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub code: String,

    #[serde(default, rename = "guild", skip_serializing_if = "Option::is_none")]
    pub server: Option<InviteServer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<InviteChannel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inviter: Option<User>,

    #[serde(default)]
    pub uses: u32,

    #[serde(default)]
    pub max_uses: u32,

    #[serde(default)]
    pub max_age: u32,

    #[serde(default)]
    pub temporary: bool,
}

/// The bot's own account, from READY.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(with = "snowflake")]
    pub id: u64,

    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub bot: bool,
}

/// A server (guild), as kept in the cache. Aggregates reference their
/// parts by id; the parts live in their own cache maps.
#[derive(Debug, Clone)]
pub struct Server {
    pub id: u64,
    pub name: String,
    pub icon: Option<String>,
    pub region: Option<String>,
    pub owner_id: u64,
    /// Ordered as delivered by the wire.
    pub roles: Vec<Role>,
    pub channels: HashSet<u64>,
    pub members: HashSet<u64>,
    pub voice_states: HashMap<u64, VoiceState>,
}

impl Server {
    /// Look up a role on this server by id.
    #[must_use]
    pub fn role(&self, id: u64) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Gateway wire payloads
// ─────────────────────────────────────────────────────────────────────────

/// The gateway frame envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// A member entry on the wire: a user plus the role ids held.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberPayload {
    pub user: User,

    #[serde(default, with = "snowflake::vec")]
    pub roles: Vec<u64>,
}

/// Full guild object, as delivered in READY and GUILD_CREATE.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerPayload {
    #[serde(with = "snowflake")]
    pub id: u64,

    pub name: String,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default, with = "snowflake::option")]
    pub owner_id: Option<u64>,

    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(default)]
    pub members: Vec<MemberPayload>,

    #[serde(default)]
    pub presences: Vec<PresencePayload>,

    #[serde(default)]
    pub voice_states: Vec<VoiceStatePayload>,
}

/// Partial guild object, as delivered in GUILD_UPDATE.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerUpdatePayload {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default, with = "snowflake::option")]
    pub owner_id: Option<u64>,

    #[serde(default)]
    pub roles: Option<Vec<Role>>,
}

/// READY dispatch payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    #[serde(default)]
    pub v: Option<i32>,

    /// Heartbeat period, in milliseconds.
    pub heartbeat_interval: u64,

    #[serde(default)]
    pub session_id: Option<String>,

    pub user: Profile,

    #[serde(default)]
    pub guilds: Vec<ServerPayload>,

    #[serde(default)]
    pub private_channels: Vec<Channel>,
}

/// The user half of a presence update; only the id is guaranteed.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUser {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(default)]
    pub username: Option<String>,
}

/// The game half of a presence update.
#[derive(Debug, Clone, Deserialize)]
pub struct Game {
    #[serde(default)]
    pub name: Option<String>,
}

/// PRESENCE_UPDATE dispatch payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PresencePayload {
    pub user: PresenceUser,

    #[serde(default)]
    pub status: OnlineStatus,

    #[serde(default)]
    pub game: Option<Game>,

    #[serde(default, with = "snowflake::option")]
    pub guild_id: Option<u64>,
}

impl PresencePayload {
    /// The game name, if one is being played.
    #[must_use]
    pub fn game_name(&self) -> Option<&str> {
        self.game.as_ref().and_then(|g| g.name.as_deref())
    }
}

/// GUILD_MEMBER_ADD / GUILD_MEMBER_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberEventPayload {
    #[serde(with = "snowflake")]
    pub guild_id: u64,

    pub user: User,

    #[serde(default, with = "snowflake::vec")]
    pub roles: Vec<u64>,
}

/// GUILD_MEMBER_REMOVE / GUILD_BAN_ADD / GUILD_BAN_REMOVE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberRemovePayload {
    #[serde(with = "snowflake")]
    pub guild_id: u64,

    pub user: User,
}

/// GUILD_MEMBERS_CHUNK payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberChunkPayload {
    #[serde(with = "snowflake")]
    pub guild_id: u64,

    #[serde(default)]
    pub members: Vec<MemberPayload>,
}

/// GUILD_ROLE_CREATE / GUILD_ROLE_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleEventPayload {
    #[serde(with = "snowflake")]
    pub guild_id: u64,

    pub role: Role,
}

/// GUILD_ROLE_DELETE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleDeletePayload {
    #[serde(with = "snowflake")]
    pub guild_id: u64,

    #[serde(with = "snowflake")]
    pub role_id: u64,
}

/// GUILD_DELETE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerDeletePayload {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(default)]
    pub unavailable: bool,
}

/// MESSAGE_UPDATE payload; everything but the ids is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEditPayload {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(with = "snowflake")]
    pub channel_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// MESSAGE_DELETE payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeletePayload {
    #[serde(with = "snowflake")]
    pub id: u64,

    #[serde(with = "snowflake")]
    pub channel_id: u64,
}

/// TYPING_START payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    #[serde(with = "snowflake")]
    pub channel_id: u64,

    #[serde(with = "snowflake")]
    pub user_id: u64,

    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// VOICE_STATE_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStatePayload {
    #[serde(with = "snowflake")]
    pub user_id: u64,

    #[serde(default, with = "snowflake::option")]
    pub guild_id: Option<u64>,

    #[serde(default, with = "snowflake::option")]
    pub channel_id: Option<u64>,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub mute: bool,

    #[serde(default)]
    pub deaf: bool,

    #[serde(default)]
    pub self_mute: bool,

    #[serde(default)]
    pub self_deaf: bool,
}

/// VOICE_SERVER_UPDATE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerPayload {
    pub token: String,

    #[serde(default, with = "snowflake::option")]
    pub guild_id: Option<u64>,

    #[serde(default)]
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_parse_from_strings_and_numbers() {
        let user: User =
            serde_json::from_str(r#"{"id": "123456789", "username": "bot"}"#).unwrap();
        assert_eq!(user.id, 123_456_789);

        let user: User = serde_json::from_str(r#"{"id": 42, "username": "bot"}"#).unwrap();
        assert_eq!(user.id, 42);
    }

    #[test]
    fn snowflakes_serialize_as_strings() {
        let role = Role {
            id: 7,
            name: "admin".into(),
            color: 0,
            hoist: false,
            position: 0,
            permissions: 8,
        };
        let json = serde_json::to_value(&role).unwrap();
        assert_eq!(json["id"], serde_json::json!("7"));
    }

    #[test]
    fn member_roles_parse_as_id_list() {
        let member: MemberPayload = serde_json::from_str(
            r#"{"user": {"id": "1", "username": "u"}, "roles": ["10", "20"]}"#,
        )
        .unwrap();
        assert_eq!(member.roles, vec![10, 20]);
    }

    #[test]
    fn channel_privacy_detection() {
        let channel: Channel = serde_json::from_str(
            r#"{"id": "5", "is_private": true, "recipient": {"id": "99", "username": "pal"}}"#,
        )
        .unwrap();
        assert!(channel.is_private());
        assert_eq!(channel.recipient.as_ref().unwrap().id, 99);

        let channel: Channel = serde_json::from_str(
            r#"{"id": "6", "type": "voice", "guild_id": "1", "name": "General"}"#,
        )
        .unwrap();
        assert!(!channel.is_private());
        assert_eq!(channel.kind, ChannelKind::Voice);
    }

    #[test]
    fn ready_payload_parses() {
        let ready: ReadyPayload = serde_json::from_str(
            r#"{
                "v": 3,
                "heartbeat_interval": 41250,
                "session_id": "sess",
                "user": {"id": "1", "username": "me", "email": "a@b.c"},
                "guilds": [{"id": "10", "name": "g"}],
                "private_channels": [{"id": "5", "is_private": true}]
            }"#,
        )
        .unwrap();
        assert_eq!(ready.heartbeat_interval, 41_250);
        assert_eq!(ready.guilds.len(), 1);
        assert_eq!(ready.private_channels.len(), 1);
        assert_eq!(ready.user.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn missing_status_defaults_to_offline() {
        let presence: PresencePayload =
            serde_json::from_str(r#"{"user": {"id": "1"}}"#).unwrap();
        assert_eq!(presence.status, OnlineStatus::Offline);
        assert!(presence.game_name().is_none());

        let presence: PresencePayload = serde_json::from_str(
            r#"{"user": {"id": "1"}, "status": "dnd", "game": {"name": "chess"}}"#,
        )
        .unwrap();
        assert_eq!(presence.status, OnlineStatus::Dnd);
        assert_eq!(presence.game_name(), Some("chess"));
    }

    #[test]
    fn mention_detection() {
        let msg: Message = serde_json::from_str(
            r#"{
                "id": "1", "channel_id": "2",
                "author": {"id": "3", "username": "a"},
                "content": "hi", "timestamp": "2016-01-01T00:00:00+00:00",
                "mentions": [{"id": "7", "username": "bot"}]
            }"#,
        )
        .unwrap();
        assert!(msg.mentions_user(7));
        assert!(!msg.mentions_user(8));
    }
}
