//! Frame dispatcher.
//!
//! Consumes one inbound gateway frame at a time, applies its cache
//! effect, and raises the resulting events in table order. Owns the
//! catalogue of operation codes and recognized event names. Cache
//! mutations for a frame complete before the dispatcher returns, so the
//! receive loop's frame-at-a-time processing gives the ordering
//! guarantee for free.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::cache::CacheStore;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::types::{
    Channel, GatewayPayload, MemberChunkPayload, MemberEventPayload, MemberRemovePayload,
    Message, MessageDeletePayload, MessageEditPayload, PresencePayload, ReadyPayload,
    RoleDeletePayload, RoleEventPayload, ServerDeletePayload, ServerUpdatePayload,
    TypingPayload, VoiceServerPayload, VoiceStatePayload,
};
use crate::voice::VoiceRegistry;

/// Gateway operation codes used by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    /// Receive: a named event.
    Dispatch = 0,
    /// Send: keep-alive carrying the current Unix millisecond timestamp.
    Heartbeat = 1,
    /// Send: authenticate the session.
    Identify = 2,
    /// Send: update the bot's presence.
    PresenceUpdate = 3,
    /// Send: join, move between, or leave voice channels.
    VoiceStateUpdate = 4,
    /// Send: request the member list of large guilds.
    RequestMembers = 8,
}

impl TryFrom<i32> for Opcode {
    type Error = ();

    fn try_from(value: i32) -> std::result::Result<Self, ()> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            3 => Ok(Self::PresenceUpdate),
            4 => Ok(Self::VoiceStateUpdate),
            8 => Ok(Self::RequestMembers),
            _ => Err(()),
        }
    }
}

/// The exhaustive catalogue of recognized dispatch names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchKind {
    Ready,
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    GuildMembersChunk,
    GuildMemberAdd,
    GuildMemberUpdate,
    GuildMemberRemove,
    GuildRoleCreate,
    GuildRoleUpdate,
    GuildRoleDelete,
    GuildBanAdd,
    GuildBanRemove,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    TypingStart,
    PresenceUpdate,
    VoiceStateUpdate,
    VoiceServerUpdate,
    /// Explicit fallthrough for names the core does not recognize.
    Unknown(String),
}

impl DispatchKind {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "READY" => Self::Ready,
            "GUILD_CREATE" => Self::GuildCreate,
            "GUILD_UPDATE" => Self::GuildUpdate,
            "GUILD_DELETE" => Self::GuildDelete,
            "GUILD_MEMBERS_CHUNK" => Self::GuildMembersChunk,
            "GUILD_MEMBER_ADD" => Self::GuildMemberAdd,
            "GUILD_MEMBER_UPDATE" => Self::GuildMemberUpdate,
            "GUILD_MEMBER_REMOVE" => Self::GuildMemberRemove,
            "GUILD_ROLE_CREATE" => Self::GuildRoleCreate,
            "GUILD_ROLE_UPDATE" => Self::GuildRoleUpdate,
            "GUILD_ROLE_DELETE" => Self::GuildRoleDelete,
            "GUILD_BAN_ADD" => Self::GuildBanAdd,
            "GUILD_BAN_REMOVE" => Self::GuildBanRemove,
            "CHANNEL_CREATE" => Self::ChannelCreate,
            "CHANNEL_UPDATE" => Self::ChannelUpdate,
            "CHANNEL_DELETE" => Self::ChannelDelete,
            "MESSAGE_CREATE" => Self::MessageCreate,
            "MESSAGE_UPDATE" => Self::MessageUpdate,
            "MESSAGE_DELETE" => Self::MessageDelete,
            "TYPING_START" => Self::TypingStart,
            "PRESENCE_UPDATE" => Self::PresenceUpdate,
            "VOICE_STATE_UPDATE" => Self::VoiceStateUpdate,
            "VOICE_SERVER_UPDATE" => Self::VoiceServerUpdate,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What a processed frame asks of the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing beyond the cache/bus effects already applied.
    Handled,
    /// READY was processed: start heartbeating at this period.
    SessionReady { heartbeat_interval: Duration },
}

/// Translates inbound frames into cache mutations and event emissions.
pub struct Dispatcher {
    cache: Arc<CacheStore>,
    bus: Arc<EventBus>,
    voice: Arc<VoiceRegistry>,
    outbound: tokio::sync::mpsc::UnboundedSender<serde_json::Value>,
    /// Dispatch the bot's own messages too.
    parse_self: bool,
}

fn parse<T: DeserializeOwned>(kind: &DispatchKind, d: serde_json::Value) -> Result<T> {
    serde_json::from_value(d)
        .map_err(|e| Error::Protocol(format!("malformed {kind:?} payload: {e}")))
}

impl Dispatcher {
    pub fn new(
        cache: Arc<CacheStore>,
        bus: Arc<EventBus>,
        voice: Arc<VoiceRegistry>,
        outbound: tokio::sync::mpsc::UnboundedSender<serde_json::Value>,
        parse_self: bool,
    ) -> Self {
        Self {
            cache,
            bus,
            voice,
            outbound,
            parse_self,
        }
    }

    /// Process one inbound frame.
    ///
    /// Any op other than dispatch, and any malformed payload, is a
    /// protocol violation: the caller drops the connection.
    pub fn dispatch(&self, frame: GatewayPayload) -> Result<DispatchOutcome> {
        match Opcode::try_from(frame.op) {
            Ok(Opcode::Dispatch) => {}
            Ok(other) => {
                return Err(Error::Protocol(format!(
                    "server sent outbound-only op {other:?}"
                )))
            }
            Err(()) => return Err(Error::Protocol(format!("unknown op {}", frame.op))),
        }

        let name = frame
            .t
            .ok_or_else(|| Error::Protocol("dispatch frame without event name".into()))?;
        let d = frame
            .d
            .ok_or_else(|| Error::Protocol("dispatch frame without payload".into()))?;

        let kind = DispatchKind::from_name(&name);
        debug!(event = %name, seq = ?frame.s, "dispatching");

        match &kind {
            DispatchKind::Ready => return self.on_ready(parse(&kind, d)?),
            DispatchKind::GuildCreate => {
                let payload = parse(&kind, d)?;
                self.cache.add_server(&payload);
                if let Some(server) = self.cache.server(payload.id) {
                    self.bus.raise(&Event::GuildCreate(server));
                }
            }
            DispatchKind::GuildUpdate => {
                let payload: ServerUpdatePayload = parse(&kind, d)?;
                self.cache.update_server(&payload);
                if let Some(server) = self.cache.server(payload.id) {
                    self.bus.raise(&Event::GuildUpdate(server));
                }
            }
            DispatchKind::GuildDelete => {
                let payload: ServerDeletePayload = parse(&kind, d)?;
                self.cache.remove_server(payload.id);
                self.bus.raise(&Event::GuildDelete {
                    server_id: payload.id,
                });
            }
            DispatchKind::GuildMembersChunk => {
                let payload: MemberChunkPayload = parse(&kind, d)?;
                for member in payload.members {
                    self.cache.add_member(payload.guild_id, member.user.clone());
                    self.cache
                        .merge_roles(payload.guild_id, member.user.id, &member.roles);
                }
            }
            DispatchKind::GuildMemberAdd => {
                let payload: MemberEventPayload = parse(&kind, d)?;
                self.cache.add_member(payload.guild_id, payload.user.clone());
                let known = self.resolve_roles(payload.guild_id, &payload.roles);
                self.cache
                    .merge_roles(payload.guild_id, payload.user.id, &known);
                self.bus.raise(&Event::MemberAdd {
                    server_id: payload.guild_id,
                    user: payload.user,
                });
            }
            DispatchKind::GuildMemberUpdate => {
                let payload: MemberEventPayload = parse(&kind, d)?;
                self.cache
                    .set_roles(payload.guild_id, payload.user.id, &payload.roles);
                self.bus.raise(&Event::MemberUpdate {
                    server_id: payload.guild_id,
                    user: payload.user,
                    roles: payload.roles,
                });
            }
            DispatchKind::GuildMemberRemove => {
                let payload: MemberRemovePayload = parse(&kind, d)?;
                self.cache.remove_member(payload.guild_id, payload.user.id);
                self.bus.raise(&Event::MemberRemove {
                    server_id: payload.guild_id,
                    user: payload.user,
                });
            }
            DispatchKind::GuildRoleCreate => {
                let payload: RoleEventPayload = parse(&kind, d)?;
                self.cache.upsert_role(payload.guild_id, payload.role.clone());
                self.bus.raise(&Event::RoleCreate {
                    server_id: payload.guild_id,
                    role: payload.role,
                });
            }
            DispatchKind::GuildRoleUpdate => {
                let payload: RoleEventPayload = parse(&kind, d)?;
                self.cache.upsert_role(payload.guild_id, payload.role.clone());
                self.bus.raise(&Event::RoleUpdate {
                    server_id: payload.guild_id,
                    role: payload.role,
                });
            }
            DispatchKind::GuildRoleDelete => {
                let payload: RoleDeletePayload = parse(&kind, d)?;
                self.cache.remove_role(payload.guild_id, payload.role_id);
                self.bus.raise(&Event::RoleDelete {
                    server_id: payload.guild_id,
                    role_id: payload.role_id,
                });
            }
            // Bans are not tracked in the cache; the events are the
            // reserved extension point.
            DispatchKind::GuildBanAdd => {
                let payload: MemberRemovePayload = parse(&kind, d)?;
                self.bus.raise(&Event::Ban {
                    server_id: payload.guild_id,
                    user: payload.user,
                });
            }
            DispatchKind::GuildBanRemove => {
                let payload: MemberRemovePayload = parse(&kind, d)?;
                self.bus.raise(&Event::Unban {
                    server_id: payload.guild_id,
                    user: payload.user,
                });
            }
            DispatchKind::ChannelCreate => {
                let channel: Channel = parse(&kind, d)?;
                self.cache.upsert_channel(channel.clone());
                self.bus.raise(&Event::ChannelCreate(channel));
            }
            DispatchKind::ChannelUpdate => {
                let channel: Channel = parse(&kind, d)?;
                self.cache.upsert_channel(channel.clone());
                self.bus.raise(&Event::ChannelUpdate(channel));
            }
            DispatchKind::ChannelDelete => {
                let channel: Channel = parse(&kind, d)?;
                self.cache.remove_channel(channel.id);
                self.bus.raise(&Event::ChannelDelete(channel));
            }
            DispatchKind::MessageCreate => self.on_message(parse(&kind, d)?),
            // Messages are not cached, so edits and deletes are pure
            // emissions.
            DispatchKind::MessageUpdate => {
                let payload: MessageEditPayload = parse(&kind, d)?;
                self.bus.raise(&Event::MessageEdit(payload));
            }
            DispatchKind::MessageDelete => {
                let payload: MessageDeletePayload = parse(&kind, d)?;
                self.bus.raise(&Event::MessageDelete(payload));
            }
            DispatchKind::TypingStart => {
                let payload: TypingPayload = parse(&kind, d)?;
                // Typing in a channel the bot may not read is dropped.
                if self.cache.is_denied(payload.channel_id) {
                    debug!(channel_id = payload.channel_id, "typing in restricted channel dropped");
                } else {
                    self.bus.raise(&Event::Typing(payload));
                }
            }
            DispatchKind::PresenceUpdate => {
                let payload: PresencePayload = parse(&kind, d)?;
                let game = payload.game_name().map(str::to_string);
                let game_changed = self.cache.set_presence(
                    payload.guild_id,
                    payload.user.id,
                    payload.user.username.as_deref(),
                    payload.status,
                    game.as_deref(),
                );
                if game_changed {
                    self.bus.raise(&Event::Playing {
                        user_id: payload.user.id,
                        game,
                    });
                } else {
                    self.bus.raise(&Event::Presence {
                        user_id: payload.user.id,
                        status: payload.status,
                    });
                }
            }
            DispatchKind::VoiceStateUpdate => {
                let payload: VoiceStatePayload = parse(&kind, d)?;
                self.on_voice_state(&payload);
            }
            DispatchKind::VoiceServerUpdate => {
                let payload: VoiceServerPayload = parse(&kind, d)?;
                match &payload.endpoint {
                    Some(endpoint) => {
                        self.voice.complete(&payload.token, endpoint);
                    }
                    None => warn!("VOICE_SERVER_UPDATE without endpoint ignored"),
                }
            }
            DispatchKind::Unknown(other) => {
                warn!(event = %other, "unknown dispatch event dropped");
            }
        }

        Ok(DispatchOutcome::Handled)
    }

    fn on_ready(&self, ready: ReadyPayload) -> Result<DispatchOutcome> {
        self.cache.reset_from_ready(&ready);
        self.bus.raise(&Event::Ready);

        // Ask for the full member lists of everything we now know about.
        let server_ids = self.cache.server_ids();
        if !server_ids.is_empty() {
            let request = json!({
                "op": Opcode::RequestMembers as i32,
                "d": { "guild_id": server_ids, "query": "", "limit": 0 }
            });
            if self.outbound.send(request).is_err() {
                warn!("outbound queue closed, member request dropped");
            }
        }

        Ok(DispatchOutcome::SessionReady {
            heartbeat_interval: Duration::from_millis(ready.heartbeat_interval),
        })
    }

    fn on_message(&self, message: Message) {
        let bot_id = self.cache.bot_user_id();

        // The bot's own messages are suppressed unless configured in.
        if !self.parse_self && bot_id == Some(message.author.id) {
            return;
        }

        let is_private = self
            .cache
            .channel(message.channel_id)
            .map_or(false, |c| c.is_private());
        let mentions_bot = bot_id.map_or(false, |id| message.mentions_user(id));

        self.bus.raise(&Event::Message(message.clone()));
        if mentions_bot {
            self.bus.raise(&Event::Mention(message.clone()));
        }
        if is_private {
            self.bus.raise(&Event::PrivateMessage(message));
        }
    }

    fn on_voice_state(&self, payload: &VoiceStatePayload) {
        if let Some(server_id) = payload.guild_id {
            self.cache.set_voice_state(server_id, payload);
        }

        // The bot's own state carries the session id the voice handshake
        // needs.
        if self.cache.bot_user_id() == Some(payload.user_id) {
            if let Some(session_id) = &payload.session_id {
                self.voice.record_session_id(session_id);
            }
        }

        self.bus.raise(&Event::VoiceStateUpdate {
            server_id: payload.guild_id,
            user_id: payload.user_id,
            state: crate::types::VoiceState {
                channel_id: payload.channel_id,
                session_id: payload.session_id.clone(),
                mute: payload.mute,
                deaf: payload.deaf,
                self_mute: payload.self_mute,
                self_deaf: payload.self_deaf,
            },
        });
    }

    /// Keep only role ids that exist on the server.
    fn resolve_roles(&self, server_id: u64, roles: &[u64]) -> Vec<u64> {
        match self.cache.server(server_id) {
            Some(server) => roles
                .iter()
                .copied()
                .filter(|id| server.role(*id).is_some())
                .collect(),
            None => roles.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use super::*;
    use crate::event::EventKind;

    struct Fixture {
        dispatcher: Dispatcher,
        cache: Arc<CacheStore>,
        bus: Arc<EventBus>,
        voice: Arc<VoiceRegistry>,
        outbound_rx: mpsc::UnboundedReceiver<Value>,
    }

    fn fixture(parse_self: bool) -> Fixture {
        let cache = Arc::new(CacheStore::new());
        // Concurrency of one keeps handler completion order deterministic.
        let bus = Arc::new(EventBus::with_concurrency(Some(1)));
        let voice = Arc::new(VoiceRegistry::new());
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::clone(&cache),
            Arc::clone(&bus),
            Arc::clone(&voice),
            outbound_tx,
            parse_self,
        );
        Fixture {
            dispatcher,
            cache,
            bus,
            voice,
            outbound_rx,
        }
    }

    fn frame(t: &str, d: Value) -> GatewayPayload {
        GatewayPayload {
            op: 0,
            d: Some(d),
            s: Some(1),
            t: Some(t.to_string()),
        }
    }

    fn ready_frame() -> GatewayPayload {
        frame(
            "READY",
            json!({
                "v": 3,
                "heartbeat_interval": 41250,
                "user": { "id": "7", "username": "bot", "bot": true },
                "guilds": [
                    { "id": "10", "name": "alpha" },
                    { "id": "20", "name": "beta" }
                ],
                "private_channels": [{
                    "id": "500",
                    "is_private": true,
                    "recipient": { "id": "99", "username": "pal" }
                }]
            }),
        )
    }

    fn collect_kinds(bus: &Arc<EventBus>) -> Arc<parking_lot::Mutex<Vec<EventKind>>> {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for kind in [
            EventKind::Message,
            EventKind::Mention,
            EventKind::PrivateMessage,
        ] {
            let sink = Arc::clone(&seen);
            bus.on(kind, None, Arc::new(move |e| sink.lock().push(e.kind())));
        }
        seen
    }

    async fn wait_for(seen: &Arc<parking_lot::Mutex<Vec<EventKind>>>, count: usize) {
        for _ in 0..100 {
            if seen.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} events, saw {:?}", seen.lock());
    }

    #[tokio::test]
    async fn non_dispatch_op_is_protocol_violation() {
        let fx = fixture(false);
        let err = fx
            .dispatcher
            .dispatch(GatewayPayload {
                op: 11,
                d: None,
                s: None,
                t: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = fx
            .dispatcher
            .dispatch(GatewayPayload {
                op: 2,
                d: Some(json!({})),
                s: None,
                t: None,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn ready_rebuilds_cache_and_requests_members() {
        let mut fx = fixture(false);
        let outcome = fx.dispatcher.dispatch(ready_frame()).unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::SessionReady {
                heartbeat_interval: Duration::from_millis(41_250)
            }
        );

        let mut ids = fx.cache.server_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 20]);
        assert!(fx.cache.private_channel(99).is_some());

        let request = fx.outbound_rx.try_recv().unwrap();
        assert_eq!(request["op"], json!(8));
        let mut requested: Vec<u64> = request["d"]["guild_id"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_u64().unwrap())
            .collect();
        requested.sort_unstable();
        assert_eq!(requested, vec![10, 20]);
    }

    #[tokio::test]
    async fn message_then_mention_order() {
        let fx = fixture(false);
        fx.dispatcher.dispatch(ready_frame()).unwrap();
        let seen = collect_kinds(&fx.bus);

        fx.dispatcher
            .dispatch(frame(
                "MESSAGE_CREATE",
                json!({
                    "id": "1000",
                    "channel_id": "600",
                    "author": { "id": "50", "username": "someone" },
                    "content": "hey bot",
                    "timestamp": "t",
                    "mentions": [{ "id": "7", "username": "bot" }]
                }),
            ))
            .unwrap();

        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock(), vec![EventKind::Message, EventKind::Mention]);
    }

    #[tokio::test]
    async fn private_message_emits_after_message() {
        let fx = fixture(false);
        fx.dispatcher.dispatch(ready_frame()).unwrap();
        let seen = collect_kinds(&fx.bus);

        fx.dispatcher
            .dispatch(frame(
                "MESSAGE_CREATE",
                json!({
                    "id": "1000",
                    "channel_id": "500",
                    "author": { "id": "99", "username": "pal" },
                    "content": "psst",
                    "timestamp": "t"
                }),
            ))
            .unwrap();

        wait_for(&seen, 2).await;
        assert_eq!(
            *seen.lock(),
            vec![EventKind::Message, EventKind::PrivateMessage]
        );
    }

    #[tokio::test]
    async fn own_messages_suppressed_unless_parse_self() {
        let fx = fixture(false);
        fx.dispatcher.dispatch(ready_frame()).unwrap();
        let seen = collect_kinds(&fx.bus);

        let own = frame(
            "MESSAGE_CREATE",
            json!({
                "id": "1000",
                "channel_id": "600",
                "author": { "id": "7", "username": "bot" },
                "content": "me",
                "timestamp": "t"
            }),
        );
        fx.dispatcher.dispatch(own.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().is_empty());

        let fx = fixture(true);
        fx.dispatcher.dispatch(ready_frame()).unwrap();
        let seen = collect_kinds(&fx.bus);
        fx.dispatcher.dispatch(own).unwrap();
        wait_for(&seen, 1).await;
        assert_eq!(*seen.lock(), vec![EventKind::Message]);
    }

    #[tokio::test]
    async fn duplicate_message_create_changes_nothing() {
        let fx = fixture(false);
        fx.dispatcher.dispatch(ready_frame()).unwrap();
        let servers_before = fx.cache.server_ids().len();
        let seen = collect_kinds(&fx.bus);

        let msg = frame(
            "MESSAGE_CREATE",
            json!({
                "id": "1000",
                "channel_id": "600",
                "author": { "id": "50", "username": "someone" },
                "content": "again",
                "timestamp": "t"
            }),
        );
        fx.dispatcher.dispatch(msg.clone()).unwrap();
        fx.dispatcher.dispatch(msg).unwrap();

        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock(), vec![EventKind::Message, EventKind::Message]);
        assert_eq!(fx.cache.server_ids().len(), servers_before);
    }

    #[tokio::test]
    async fn typing_in_restricted_channel_dropped() {
        let fx = fixture(false);
        let seen = Arc::new(parking_lot::Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        fx.bus
            .on(EventKind::Typing, None, Arc::new(move |_| *sink.lock() += 1));

        fx.cache.deny_channel(600);
        fx.dispatcher
            .dispatch(frame(
                "TYPING_START",
                json!({ "channel_id": "600", "user_id": "50" }),
            ))
            .unwrap();
        fx.dispatcher
            .dispatch(frame(
                "TYPING_START",
                json!({ "channel_id": "601", "user_id": "50" }),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), 1);
    }

    #[tokio::test]
    async fn presence_picks_playing_on_game_change() {
        let fx = fixture(false);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for kind in [EventKind::Playing, EventKind::Presence] {
            let sink = Arc::clone(&seen);
            fx.bus
                .on(kind, None, Arc::new(move |e| sink.lock().push(e.kind())));
        }

        fx.dispatcher
            .dispatch(frame(
                "PRESENCE_UPDATE",
                json!({
                    "user": { "id": "50", "username": "someone" },
                    "status": "online",
                    "game": { "name": "chess" }
                }),
            ))
            .unwrap();
        fx.dispatcher
            .dispatch(frame(
                "PRESENCE_UPDATE",
                json!({
                    "user": { "id": "50" },
                    "status": "idle",
                    "game": { "name": "chess" }
                }),
            ))
            .unwrap();

        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock(), vec![EventKind::Playing, EventKind::Presence]);
        assert_eq!(fx.cache.user(50).unwrap().game.as_deref(), Some("chess"));
    }

    #[tokio::test]
    async fn unknown_event_is_dropped() {
        let fx = fixture(false);
        let outcome = fx
            .dispatcher
            .dispatch(frame("SOMETHING_NEW", json!({ "x": 1 })))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Handled);
    }

    #[tokio::test]
    async fn guild_lifecycle_round_trip() {
        let fx = fixture(false);
        fx.dispatcher.dispatch(ready_frame()).unwrap();

        fx.dispatcher
            .dispatch(frame(
                "GUILD_CREATE",
                json!({
                    "id": "30",
                    "name": "gamma",
                    "owner_id": "1",
                    "roles": [{ "id": "300", "name": "r" }],
                    "channels": [{ "id": "31", "name": "general", "type": "text" }],
                    "members": [{ "user": { "id": "50", "username": "m" }, "roles": ["300"] }]
                }),
            ))
            .unwrap();
        assert!(fx.cache.server(30).is_some());
        assert!(fx.cache.channel(31).is_some());

        fx.dispatcher
            .dispatch(frame("GUILD_DELETE", json!({ "id": "30" })))
            .unwrap();
        assert!(fx.cache.server(30).is_none());
        assert!(fx.cache.channel(31).is_none());
        assert!(!fx.cache.user(50).unwrap().roles.contains_key(&30));
    }

    #[tokio::test]
    async fn member_add_resolves_roles_against_server() {
        let fx = fixture(false);
        fx.dispatcher
            .dispatch(frame(
                "GUILD_CREATE",
                json!({
                    "id": "30",
                    "name": "gamma",
                    "owner_id": "1",
                    "roles": [{ "id": "300", "name": "known" }]
                }),
            ))
            .unwrap();

        fx.dispatcher
            .dispatch(frame(
                "GUILD_MEMBER_ADD",
                json!({
                    "guild_id": "30",
                    "user": { "id": "60", "username": "fresh" },
                    "roles": ["300", "999"]
                }),
            ))
            .unwrap();

        let roles = &fx.cache.user(60).unwrap().roles[&30];
        assert!(roles.contains(&300));
        assert!(!roles.contains(&999));
    }

    #[tokio::test]
    async fn voice_handshake_completes_through_frames() {
        let fx = fixture(false);
        fx.dispatcher.dispatch(ready_frame()).unwrap();

        let mut rx = fx.voice.begin_connect(42, Some(10), true);

        fx.dispatcher
            .dispatch(frame(
                "VOICE_STATE_UPDATE",
                json!({
                    "user_id": "7",
                    "guild_id": "10",
                    "channel_id": "42",
                    "session_id": "vsess"
                }),
            ))
            .unwrap();

        fx.dispatcher
            .dispatch(frame(
                "VOICE_SERVER_UPDATE",
                json!({ "token": "T", "guild_id": "10", "endpoint": "ep:443" }),
            ))
            .unwrap();

        let connection = rx.try_recv().unwrap();
        assert_eq!(connection.channel_id, 42);
        assert_eq!(connection.session_id, "vsess");
        assert_eq!(connection.token, "T");
        assert_eq!(connection.endpoint, "ep:443");
        assert!(connection.encrypted);
    }
}
