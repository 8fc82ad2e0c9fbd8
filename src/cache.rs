//! In-process entity cache.
//!
//! One map per entity kind, all keyed by id; aggregates reference their
//! parts by id so cross-entity links never form ownership cycles. The
//! whole store sits behind a single lock so handler tasks read a
//! consistent snapshot of any entity. Writers are the dispatcher plus
//! two facade paths (the `channel` REST fallback and the voice-connect
//! state update).
//!
//! Invariants maintained here:
//! - every channel in a server's channel set is present in the channel map;
//! - every member of a server exists in the user map with a role entry
//!   for that server;
//! - the denylist is disjoint from the channel map;
//! - the bot user is the user-map entry at the profile id.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use crate::types::{
    Channel, ChannelKind, OnlineStatus, Profile, ReadyPayload, Role, Server, ServerPayload,
    ServerUpdatePayload, User, VoiceState, VoiceStatePayload,
};

#[derive(Debug, Default)]
struct Inner {
    servers: HashMap<u64, Server>,
    channels: HashMap<u64, Channel>,
    users: HashMap<u64, User>,
    /// Private channels, keyed by recipient user id.
    private_channels: HashMap<u64, Channel>,
    /// Channels the bot may not read. Disjoint from `channels`.
    restricted_channels: HashSet<u64>,
    profile: Option<Profile>,
}

/// The shared entity cache.
#[derive(Debug, Default)]
pub struct CacheStore {
    inner: RwLock<Inner>,
}

impl CacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // READY rebuild
    // ─────────────────────────────────────────────────────────────────────

    /// Reset the cache and rebuild it from a READY payload.
    pub fn reset_from_ready(&self, ready: &ReadyPayload) {
        {
            let mut inner = self.inner.write();
            *inner = Inner::default();

            inner.profile = Some(ready.user.clone());
            let bot = User {
                id: ready.user.id,
                username: ready.user.username.clone(),
                discriminator: ready.user.discriminator.clone(),
                avatar: ready.user.avatar.clone(),
                bot: ready.user.bot,
                status: OnlineStatus::Online,
                game: None,
                roles: HashMap::new(),
            };
            inner.users.insert(bot.id, bot);
        }

        for guild in &ready.guilds {
            self.add_server(guild);
        }
        for channel in &ready.private_channels {
            self.upsert_channel(channel.clone());
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Servers
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a server and everything it carries: channels, members,
    /// presences, voice states.
    pub fn add_server(&self, payload: &ServerPayload) {
        {
            let mut inner = self.inner.write();
            let server = Server {
                id: payload.id,
                name: payload.name.clone(),
                icon: payload.icon.clone(),
                region: payload.region.clone(),
                owner_id: payload.owner_id.unwrap_or_default(),
                roles: payload.roles.clone(),
                channels: HashSet::new(),
                members: HashSet::new(),
                voice_states: HashMap::new(),
            };
            inner.servers.insert(payload.id, server);
        }

        for channel in &payload.channels {
            let mut channel = channel.clone();
            channel.server_id = Some(payload.id);
            self.upsert_channel(channel);
        }

        for member in &payload.members {
            self.add_member(payload.id, member.user.clone());
            self.merge_roles(payload.id, member.user.id, &member.roles);
        }

        for presence in &payload.presences {
            self.set_presence(
                Some(payload.id),
                presence.user.id,
                presence.user.username.as_deref(),
                presence.status,
                presence.game_name(),
            );
        }

        for state in &payload.voice_states {
            self.set_voice_state(payload.id, state);
        }
    }

    /// Merge a partial guild update into an existing server.
    pub fn update_server(&self, payload: &ServerUpdatePayload) {
        let mut inner = self.inner.write();
        if let Some(server) = inner.servers.get_mut(&payload.id) {
            if let Some(name) = &payload.name {
                server.name = name.clone();
            }
            if payload.icon.is_some() {
                server.icon = payload.icon.clone();
            }
            if payload.region.is_some() {
                server.region = payload.region.clone();
            }
            if let Some(owner_id) = payload.owner_id {
                server.owner_id = owner_id;
            }
            if let Some(roles) = &payload.roles {
                server.roles = roles.clone();
            }
        }
    }

    /// Remove a server, its channels, and every role its members held on
    /// it. Users themselves persist.
    pub fn remove_server(&self, server_id: u64) -> Option<Server> {
        let mut inner = self.inner.write();
        let server = inner.servers.remove(&server_id)?;

        for channel_id in &server.channels {
            if let Some(channel) = inner.channels.remove(channel_id) {
                if let Some(recipient) = &channel.recipient {
                    inner.private_channels.remove(&recipient.id);
                }
            }
        }

        for user in inner.users.values_mut() {
            user.roles.remove(&server_id);
        }

        Some(server)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────

    /// Insert or replace a channel, keeping the parent server's channel
    /// set and the private-channel index in step.
    pub fn upsert_channel(&self, mut channel: Channel) {
        let mut inner = self.inner.write();

        if channel.is_private() {
            channel.kind = ChannelKind::Private;
        }

        // A cached channel is by definition readable.
        inner.restricted_channels.remove(&channel.id);

        if let Some(server_id) = channel.server_id {
            if let Some(server) = inner.servers.get_mut(&server_id) {
                server.channels.insert(channel.id);
            }
        }

        if let Some(recipient) = channel.recipient.clone() {
            inner
                .users
                .entry(recipient.id)
                .or_insert_with(|| recipient.clone());
            inner.private_channels.insert(recipient.id, channel.clone());
        }

        inner.channels.insert(channel.id, channel);
    }

    /// Remove a channel from the map, the parent's set, and the private
    /// index.
    pub fn remove_channel(&self, channel_id: u64) -> Option<Channel> {
        let mut inner = self.inner.write();
        let channel = inner.channels.remove(&channel_id)?;

        if let Some(server_id) = channel.server_id {
            if let Some(server) = inner.servers.get_mut(&server_id) {
                server.channels.remove(&channel_id);
            }
        }
        if let Some(recipient) = &channel.recipient {
            inner.private_channels.remove(&recipient.id);
        }

        Some(channel)
    }

    /// Record a channel the bot may not read.
    pub fn deny_channel(&self, channel_id: u64) {
        let mut inner = self.inner.write();
        if !inner.channels.contains_key(&channel_id) {
            inner.restricted_channels.insert(channel_id);
        }
    }

    #[must_use]
    pub fn is_denied(&self, channel_id: u64) -> bool {
        self.inner.read().restricted_channels.contains(&channel_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Members and roles
    // ─────────────────────────────────────────────────────────────────────

    /// Add a user to a server's member set, creating or refreshing the
    /// user entry and ensuring it has a role entry for that server.
    pub fn add_member(&self, server_id: u64, user: User) {
        let mut inner = self.inner.write();

        if let Some(server) = inner.servers.get_mut(&server_id) {
            server.members.insert(user.id);
        }

        let entry = inner.users.entry(user.id).or_insert_with(|| user.clone());
        // Refresh identity fields; presence and roles are cache-owned.
        entry.username = user.username;
        entry.discriminator = user.discriminator;
        entry.avatar = user.avatar;
        entry.bot = user.bot;
        entry.roles.entry(server_id).or_default();
    }

    /// Remove a user from a server's member set and clear their role
    /// entry for it.
    pub fn remove_member(&self, server_id: u64, user_id: u64) {
        let mut inner = self.inner.write();
        if let Some(server) = inner.servers.get_mut(&server_id) {
            server.members.remove(&user_id);
            server.voice_states.remove(&user_id);
        }
        if let Some(user) = inner.users.get_mut(&user_id) {
            user.roles.remove(&server_id);
        }
    }

    /// Add roles to a member's set for one server.
    pub fn merge_roles(&self, server_id: u64, user_id: u64, roles: &[u64]) {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .entry(user_id)
            .or_insert_with(|| User::unknown(user_id));
        user.roles.entry(server_id).or_default().extend(roles);
    }

    /// Replace a member's role set for one server.
    pub fn set_roles(&self, server_id: u64, user_id: u64, roles: &[u64]) {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .entry(user_id)
            .or_insert_with(|| User::unknown(user_id));
        user.roles.insert(server_id, roles.iter().copied().collect());
    }

    /// Insert or replace a role definition on a server.
    pub fn upsert_role(&self, server_id: u64, role: Role) {
        let mut inner = self.inner.write();
        if let Some(server) = inner.servers.get_mut(&server_id) {
            if let Some(existing) = server.roles.iter_mut().find(|r| r.id == role.id) {
                *existing = role;
            } else {
                server.roles.push(role);
            }
        }
    }

    /// Delete a role definition and strip it from every member.
    pub fn remove_role(&self, server_id: u64, role_id: u64) {
        let mut inner = self.inner.write();
        if let Some(server) = inner.servers.get_mut(&server_id) {
            server.roles.retain(|r| r.id != role_id);
        }
        for user in inner.users.values_mut() {
            if let Some(roles) = user.roles.get_mut(&server_id) {
                roles.remove(&role_id);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Presence and voice
    // ─────────────────────────────────────────────────────────────────────

    /// Apply a presence change. Creates the user lazily, refreshes the
    /// username, and adds the user to the server's member set when newly
    /// non-offline. Returns `true` when the game changed.
    pub fn set_presence(
        &self,
        server_id: Option<u64>,
        user_id: u64,
        username: Option<&str>,
        status: OnlineStatus,
        game: Option<&str>,
    ) -> bool {
        let mut inner = self.inner.write();

        if let (Some(server_id), true) = (server_id, status != OnlineStatus::Offline) {
            if let Some(server) = inner.servers.get_mut(&server_id) {
                server.members.insert(user_id);
            }
        }

        let user = inner
            .users
            .entry(user_id)
            .or_insert_with(|| User::unknown(user_id));

        if let Some(username) = username {
            if user.username != username {
                debug!(user_id, username, "username changed via presence");
                user.username = username.to_string();
            }
        }
        if let Some(server_id) = server_id {
            user.roles.entry(server_id).or_default();
        }

        user.status = status;
        let game_changed = user.game.as_deref() != game;
        user.game = game.map(str::to_string);
        game_changed
    }

    /// Apply a voice-state change on one server. A `None` channel moves
    /// the user out of voice entirely.
    pub fn set_voice_state(&self, server_id: u64, payload: &VoiceStatePayload) {
        let mut inner = self.inner.write();
        if let Some(server) = inner.servers.get_mut(&server_id) {
            if payload.channel_id.is_none() {
                server.voice_states.remove(&payload.user_id);
            } else {
                server.voice_states.insert(
                    payload.user_id,
                    VoiceState {
                        channel_id: payload.channel_id,
                        session_id: payload.session_id.clone(),
                        mute: payload.mute,
                        deaf: payload.deaf,
                        self_mute: payload.self_mute,
                        self_deaf: payload.self_deaf,
                    },
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn server(&self, id: u64) -> Option<Server> {
        self.inner.read().servers.get(&id).cloned()
    }

    #[must_use]
    pub fn channel(&self, id: u64) -> Option<Channel> {
        self.inner.read().channels.get(&id).cloned()
    }

    #[must_use]
    pub fn user(&self, id: u64) -> Option<User> {
        self.inner.read().users.get(&id).cloned()
    }

    /// The private channel with a user, by recipient id.
    #[must_use]
    pub fn private_channel(&self, recipient_id: u64) -> Option<Channel> {
        self.inner.read().private_channels.get(&recipient_id).cloned()
    }

    #[must_use]
    pub fn servers(&self) -> Vec<Server> {
        self.inner.read().servers.values().cloned().collect()
    }

    #[must_use]
    pub fn server_ids(&self) -> Vec<u64> {
        self.inner.read().servers.keys().copied().collect()
    }

    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.inner.read().users.values().cloned().collect()
    }

    /// The bot's own account, from READY.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.read().profile.clone()
    }

    /// The bot's user-cache entry.
    #[must_use]
    pub fn bot_user(&self) -> Option<User> {
        let inner = self.inner.read();
        let id = inner.profile.as_ref()?.id;
        inner.users.get(&id).cloned()
    }

    #[must_use]
    pub fn bot_user_id(&self) -> Option<u64> {
        self.inner.read().profile.as_ref().map(|p| p.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_payload(id: u64, name: &str) -> ServerPayload {
        serde_json::from_value(json!({
            "id": id.to_string(),
            "name": name,
            "owner_id": "1",
            "roles": [{ "id": "900", "name": "everyone" }],
            "channels": [
                { "id": (id * 10).to_string(), "name": "general", "type": "text" }
            ],
            "members": [
                { "user": { "id": "50", "username": "member" }, "roles": ["900"] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn server_channels_land_in_channel_map() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));

        let server = cache.server(10).unwrap();
        for channel_id in &server.channels {
            let channel = cache.channel(*channel_id).unwrap();
            assert_eq!(channel.server_id, Some(10));
        }
    }

    #[test]
    fn members_exist_with_role_entries() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));

        let server = cache.server(10).unwrap();
        for member_id in &server.members {
            let user = cache.user(*member_id).unwrap();
            assert!(user.roles.contains_key(&10));
        }
        assert!(cache.user(50).unwrap().roles[&10].contains(&900));
    }

    #[test]
    fn remove_server_strips_roles_and_channels() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));
        cache.remove_server(10);

        assert!(cache.server(10).is_none());
        assert!(cache.channel(100).is_none());
        let user = cache.user(50).unwrap();
        assert!(!user.roles.contains_key(&10));
    }

    #[test]
    fn guild_create_then_delete_round_trips() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));
        cache.remove_server(10);

        assert!(cache.servers().is_empty());
        assert!(cache.channel(100).is_none());
        // Users persist, but without any trace of the server.
        assert!(cache.user(50).unwrap().roles.is_empty());
    }

    #[test]
    fn presence_last_write_wins() {
        let cache = CacheStore::new();
        cache.set_presence(None, 5, Some("u"), OnlineStatus::Online, None);
        cache.set_presence(None, 5, None, OnlineStatus::Idle, None);
        cache.set_presence(None, 5, None, OnlineStatus::Dnd, None);
        assert_eq!(cache.user(5).unwrap().status, OnlineStatus::Dnd);
    }

    #[test]
    fn presence_reports_game_changes() {
        let cache = CacheStore::new();
        assert!(cache.set_presence(None, 5, None, OnlineStatus::Online, Some("chess")));
        assert!(!cache.set_presence(None, 5, None, OnlineStatus::Idle, Some("chess")));
        assert!(cache.set_presence(None, 5, None, OnlineStatus::Idle, None));
    }

    #[test]
    fn presence_adds_member_when_newly_online() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));
        cache.set_presence(Some(10), 77, Some("new"), OnlineStatus::Online, None);
        assert!(cache.server(10).unwrap().members.contains(&77));
        assert!(cache.user(77).unwrap().roles.contains_key(&10));
    }

    #[test]
    fn denylist_stays_disjoint_from_channels() {
        let cache = CacheStore::new();
        cache.deny_channel(42);
        assert!(cache.is_denied(42));

        let channel: Channel =
            serde_json::from_value(json!({ "id": "42", "name": "now-visible", "type": "text" }))
                .unwrap();
        cache.upsert_channel(channel);
        assert!(!cache.is_denied(42));
        assert!(cache.channel(42).is_some());
    }

    #[test]
    fn role_delete_strips_members() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));
        cache.remove_role(10, 900);

        assert!(cache.server(10).unwrap().role(900).is_none());
        assert!(!cache.user(50).unwrap().roles[&10].contains(&900));
    }

    #[test]
    fn member_update_replaces_role_set() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));
        cache.set_roles(10, 50, &[901, 902]);

        let roles = &cache.user(50).unwrap().roles[&10];
        assert!(!roles.contains(&900));
        assert!(roles.contains(&901) && roles.contains(&902));
    }

    #[test]
    fn ready_rebuild_resets_everything() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(99, "stale"));

        let ready: ReadyPayload = serde_json::from_value(json!({
            "heartbeat_interval": 41250,
            "user": { "id": "7", "username": "bot" },
            "guilds": [
                { "id": "10", "name": "a" },
                { "id": "20", "name": "b" }
            ],
            "private_channels": [{
                "id": "500",
                "is_private": true,
                "recipient": { "id": "99", "username": "pal" }
            }]
        }))
        .unwrap();
        cache.reset_from_ready(&ready);

        assert!(cache.server(99).is_none());
        let mut ids = cache.server_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 20]);
        assert!(cache.private_channel(99).is_some());
        assert_eq!(cache.bot_user().unwrap().id, 7);
        assert_eq!(cache.bot_user_id(), Some(7));
    }

    #[test]
    fn voice_state_moves_in_and_out() {
        let cache = CacheStore::new();
        cache.add_server(&server_payload(10, "alpha"));

        let state: VoiceStatePayload = serde_json::from_value(json!({
            "user_id": "50",
            "guild_id": "10",
            "channel_id": "101",
            "session_id": "sess"
        }))
        .unwrap();
        cache.set_voice_state(10, &state);
        assert_eq!(
            cache.server(10).unwrap().voice_states[&50].channel_id,
            Some(101)
        );

        let gone: VoiceStatePayload = serde_json::from_value(json!({
            "user_id": "50",
            "guild_id": "10"
        }))
        .unwrap();
        cache.set_voice_state(10, &gone);
        assert!(!cache.server(10).unwrap().voice_states.contains_key(&50));
    }
}
