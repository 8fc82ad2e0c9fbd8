//! Public facade.
//!
//! A [`Client`] owns the shared state (cache, bus, voice registry, REST
//! client) and hands the session manager its end of the outbound queue.
//! Everything a bot author calls lives here.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::bus::{EventBus, Handler, HandlerId, Predicate};
use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::gateway::{presence_frame, voice_state_frame, Session};
use crate::types::{Channel, Invite, Message, Profile, Server, ServerPayload, User};
use crate::voice::{VoiceConnection, VoiceRegistry};

/// A single-shard gateway client.
pub struct Client {
    config: ClientConfig,
    api: Arc<ApiClient>,
    cache: Arc<CacheStore>,
    bus: Arc<EventBus>,
    voice: Arc<VoiceRegistry>,
    outbound_tx: mpsc::UnboundedSender<Value>,
    /// Taken by the first `run`; a session can only be driven once at a
    /// time.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Client {
    /// Build a client. No network traffic happens until [`Client::run`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config)?);
        let bus = Arc::new(EventBus::with_concurrency(config.handler_concurrency));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            api,
            cache: Arc::new(CacheStore::new()),
            bus,
            voice: Arc::new(VoiceRegistry::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx,
        })
    }

    fn session(&self) -> Result<Session> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Transport("session already running".into()))?;
        Ok(Session::new(
            self.config.clone(),
            Arc::clone(&self.api),
            Arc::clone(&self.cache),
            Arc::clone(&self.bus),
            Arc::clone(&self.voice),
            self.outbound_tx.clone(),
            outbound_rx,
            self.shutdown_tx.subscribe(),
        ))
    }

    /// Run the session, blocking the caller until it terminates.
    /// `InvalidAuthentication` surfaces here; transient faults feed the
    /// reconnect loop internally.
    pub async fn run(&self) -> Result<()> {
        self.session()?.run().await
    }

    /// Spawn the session onto the runtime and return immediately.
    pub fn run_async(&self) -> Result<tokio::task::JoinHandle<Result<()>>> {
        let session = self.session()?;
        Ok(tokio::spawn(session.run()))
    }

    /// Terminate the session. In-flight handler tasks are orphaned.
    pub fn stop(&self) {
        info!("stop requested");
        let _ = self.shutdown_tx.send(true);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Handlers and awaits
    // ─────────────────────────────────────────────────────────────────────

    /// Register an event handler; fires in registration order.
    pub fn on(&self, kind: EventKind, handler: Handler) -> HandlerId {
        self.bus.on(kind, None, handler)
    }

    /// Register a handler gated by a predicate.
    pub fn on_filtered(&self, kind: EventKind, predicate: Predicate, handler: Handler) -> HandlerId {
        self.bus.on(kind, Some(predicate), handler)
    }

    /// Remove a handler registration.
    pub fn off(&self, id: HandlerId) {
        self.bus.off(id);
    }

    /// Register a keyed one-shot await; the matched event arrives on the
    /// returned channel.
    pub fn add_await(
        &self,
        key: impl Into<String>,
        kind: EventKind,
        attrs: serde_json::Map<String, Value>,
    ) -> mpsc::UnboundedReceiver<Event> {
        self.bus.add_await(key, kind, attrs, false)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a channel, falling back to REST on a cache miss. A
    /// `NoPermission` rejection is remembered so the channel is not
    /// fetched again.
    pub async fn channel(&self, channel_id: u64) -> Result<Channel> {
        if let Some(channel) = self.cache.channel(channel_id) {
            return Ok(channel);
        }
        if self.cache.is_denied(channel_id) {
            return Err(Error::NoPermission);
        }

        match self.api.channel(channel_id).await {
            Ok(channel) => {
                self.cache.upsert_channel(channel.clone());
                Ok(channel)
            }
            Err(Error::NoPermission) => {
                warn!(channel_id, "channel restricted, denylisting");
                self.cache.deny_channel(channel_id);
                Err(Error::NoPermission)
            }
            Err(e) => Err(e),
        }
    }

    /// Cache-only user lookup.
    #[must_use]
    pub fn user(&self, user_id: u64) -> Option<User> {
        self.cache.user(user_id)
    }

    /// Cache-only server lookup.
    #[must_use]
    pub fn server(&self, server_id: u64) -> Option<Server> {
        self.cache.server(server_id)
    }

    /// Every channel named `name`; when `server_name` is given, only
    /// channels on that server.
    #[must_use]
    pub fn find_channel(&self, name: &str, server_name: Option<&str>) -> Vec<Channel> {
        let mut found = Vec::new();
        for server in self.cache.servers() {
            if server_name.is_some_and(|wanted| wanted != server.name) {
                continue;
            }
            for channel_id in &server.channels {
                if let Some(channel) = self.cache.channel(*channel_id) {
                    if channel.name.as_deref() == Some(name) {
                        found.push(channel);
                    }
                }
            }
        }
        found
    }

    /// Every cached user named `name`.
    #[must_use]
    pub fn find_user(&self, name: &str) -> Vec<User> {
        self.cache
            .users()
            .into_iter()
            .filter(|u| u.username == name)
            .collect()
    }

    /// Resolve a `<@id>` mention to the cached user.
    #[must_use]
    pub fn parse_mention(&self, text: &str) -> Option<User> {
        let start = text.find("<@")? + 2;
        let rest = &text[start..];
        let end = rest.find('>')?;
        let digits = &rest[..end];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.cache.user(digits.parse().ok()?)
    }

    /// The bot's own user-cache entry, available after READY.
    #[must_use]
    pub fn bot_user(&self) -> Option<User> {
        self.cache.bot_user()
    }

    /// The bot's account profile, available after READY.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.cache.profile()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────

    /// Send a message, returning the created message.
    pub async fn send_message(
        &self,
        channel_id: u64,
        content: &str,
        tts: bool,
    ) -> Result<Message> {
        self.api.send_message(channel_id, content, tts).await
    }

    /// Send a file with optional accompanying text.
    pub async fn send_file(
        &self,
        channel_id: u64,
        filename: &str,
        bytes: Vec<u8>,
        content: Option<&str>,
    ) -> Result<Message> {
        self.api.send_file(channel_id, filename, bytes, content).await
    }

    /// Open the private channel with a user, preferring the cache.
    pub async fn create_private(&self, recipient_id: u64) -> Result<Channel> {
        if let Some(channel) = self.cache.private_channel(recipient_id) {
            return Ok(channel);
        }
        let channel = self.api.create_private(recipient_id).await?;
        self.cache.upsert_channel(channel.clone());
        Ok(channel)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Invites and servers
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve an invite code or URL.
    pub async fn resolve_invite(&self, invite: &str) -> Result<Invite> {
        self.api.resolve_invite(invite).await
    }

    /// Accept an invite.
    pub async fn join_server(&self, invite: &str) -> Result<Invite> {
        self.api.join_server(invite).await
    }

    /// Revoke an invite.
    pub async fn delete_invite(&self, invite: &str) -> Result<()> {
        self.api.delete_invite(invite).await
    }

    /// Create a server owned by this account.
    pub async fn create_server(&self, name: &str, region: &str) -> Result<ServerPayload> {
        self.api.create_server(name, region).await
    }

    /// Create an OAuth application.
    pub async fn create_oauth_application(&self, name: &str) -> Result<Value> {
        self.api.create_oauth_application(name).await
    }

    /// Update an OAuth application.
    pub async fn update_oauth_application(
        &self,
        application_id: u64,
        name: &str,
        redirect_uris: &[String],
        description: Option<&str>,
    ) -> Result<Value> {
        self.api
            .update_oauth_application(application_id, name, redirect_uris, description)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Presence and voice
    // ─────────────────────────────────────────────────────────────────────

    /// Set (or clear) the game shown on the bot's presence.
    pub fn set_game(&self, game: Option<&str>) {
        if self.outbound_tx.send(presence_frame(game)).is_err() {
            warn!("presence update dropped, session not running");
        }
    }

    /// Join a voice channel and wait for the handshake to complete.
    /// Tears down any existing voice session first.
    pub async fn voice_connect(
        &self,
        channel_id: u64,
        encrypted: bool,
    ) -> Result<Arc<VoiceConnection>> {
        let server_id = self.cache.channel(channel_id).and_then(|c| c.server_id);
        let rx = self.voice.begin_connect(channel_id, server_id, encrypted);

        self.outbound_tx
            .send(voice_state_frame(server_id, Some(channel_id)))
            .map_err(|_| Error::Transport("session not running".into()))?;

        rx.await
            .map_err(|_| Error::Transport("voice handshake aborted".into()))
    }

    /// Leave voice entirely.
    pub fn voice_destroy(&self) {
        if self.outbound_tx.send(voice_state_frame(None, None)).is_err() {
            warn!("voice disconnect frame dropped, session not running");
        }
        self.voice.teardown();
    }

    /// The active voice session, if any.
    #[must_use]
    pub fn voice(&self) -> Option<Arc<VoiceConnection>> {
        self.voice.active()
    }
}
