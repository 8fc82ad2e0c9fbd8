//! Gateway session manager.
//!
//! Owns the WebSocket lifecycle: fetch the gateway URL, connect, send
//! IDENTIFY, heartbeat at the READY-supplied interval, and reconnect
//! with backoff on any non-user-initiated disconnect. All socket writes
//! (heartbeat, dispatcher, facade) funnel through a single outbound
//! queue drained by the session task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::bus::EventBus;
use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher, Opcode};
use crate::error::{Error, Result};
use crate::token_cache::TokenCache;
use crate::types::GatewayPayload;
use crate::voice::VoiceRegistry;

// ─────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────

/// Reconnect backoff: 1.0 s first, ×1.5 per failure, and any value above
/// one second is replaced by 115 + uniform(0, 10) s.
#[derive(Debug)]
pub(crate) struct Backoff {
    falloff: f64,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self { falloff: 1.0 }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = if self.falloff > 1.0 {
            115.0 + rand::random::<f64>() * 10.0
        } else {
            self.falloff
        };
        self.falloff *= 1.5;
        Duration::from_secs_f64(delay)
    }

    pub(crate) fn reset(&mut self) {
        self.falloff = 1.0;
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Outbound frame builders
// ─────────────────────────────────────────────────────────────────────────

pub(crate) fn identify_frame(token: &str, bot_name: &str) -> serde_json::Value {
    json!({
        "op": Opcode::Identify as i32,
        "d": {
            "v": 3,
            "token": token,
            "properties": {
                "$os": std::env::consts::OS,
                "$browser": bot_name,
                "$device": bot_name,
                "$referrer": "",
                "$referring_domain": "",
            },
            "large_threshold": 100,
        }
    })
}

pub(crate) fn heartbeat_frame() -> serde_json::Value {
    json!({
        "op": Opcode::Heartbeat as i32,
        "d": chrono::Utc::now().timestamp_millis(),
    })
}

pub(crate) fn presence_frame(game: Option<&str>) -> serde_json::Value {
    json!({
        "op": Opcode::PresenceUpdate as i32,
        "d": {
            "idle_since": null,
            "game": { "name": game },
        }
    })
}

pub(crate) fn voice_state_frame(
    server_id: Option<u64>,
    channel_id: Option<u64>,
) -> serde_json::Value {
    json!({
        "op": Opcode::VoiceStateUpdate as i32,
        "d": {
            "guild_id": server_id.map(|id| id.to_string()),
            "channel_id": channel_id.map(|id| id.to_string()),
            "self_mute": false,
            "self_deaf": false,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────
// Login
// ─────────────────────────────────────────────────────────────────────────

/// Resolve a session token: sentinel identity short-circuits, then the
/// token cache, then REST login with retries for transient faults.
pub(crate) async fn resolve_token(config: &ClientConfig, api: &ApiClient) -> Result<String> {
    if config.uses_raw_token() {
        return Ok(config.secret.clone());
    }

    let mut cache = TokenCache::load(&config.token_cache_path);
    if let Some(token) = cache.lookup(&config.identity, &config.secret) {
        debug!(identity = %config.identity, "token cache hit");
        return Ok(token.to_string());
    }

    let mut attempts = 0;
    loop {
        attempts += 1;
        match api.login(&config.identity, &config.secret).await {
            Ok(token) => {
                info!(identity = %config.identity, "logged in");
                cache.store(&config.identity, &config.secret, &token);
                return Ok(token);
            }
            Err(e) if e.is_transient_login() => {
                if attempts >= config.login_retry.max_attempts {
                    error!(attempts, error = %e, "login retries exhausted");
                    return Err(e);
                }
                warn!(attempt = attempts, error = %e, "transient login failure, retrying");
                tokio::time::sleep(Duration::from_secs(config.login_retry.sleep_secs)).await;
            }
            Err(Error::InvalidAuthentication) => return Err(Error::InvalidAuthentication),
            Err(e) => {
                // Any other rejection means the credentials are no good.
                warn!(error = %e, "login rejected");
                return Err(Error::InvalidAuthentication);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────

enum ConnectionEnd {
    /// User called stop.
    UserStop,
    /// Transient failure; reconnect after backoff.
    Retry,
}

/// The session task: drives the connection state machine until stopped
/// or fatally rejected.
pub(crate) struct Session {
    config: ClientConfig,
    api: Arc<ApiClient>,
    dispatcher: Dispatcher,
    voice: Arc<VoiceRegistry>,
    outbound_tx: mpsc::UnboundedSender<serde_json::Value>,
    outbound_rx: mpsc::UnboundedReceiver<serde_json::Value>,
    shutdown: watch::Receiver<bool>,
    /// Heartbeat gate: set on READY, cleared on close.
    heartbeat_active: Arc<AtomicBool>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: ClientConfig,
        api: Arc<ApiClient>,
        cache: Arc<CacheStore>,
        bus: Arc<EventBus>,
        voice: Arc<VoiceRegistry>,
        outbound_tx: mpsc::UnboundedSender<serde_json::Value>,
        outbound_rx: mpsc::UnboundedReceiver<serde_json::Value>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            cache,
            bus,
            Arc::clone(&voice),
            outbound_tx.clone(),
            config.parse_self,
        );
        Self {
            config,
            api,
            dispatcher,
            voice,
            outbound_tx,
            outbound_rx,
            shutdown,
            heartbeat_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the session until stopped. Rejected credentials (and login
    /// retries running out of attempts) surface; everything else feeds
    /// the reconnect loop.
    pub(crate) async fn run(mut self) -> Result<()> {
        let mut backoff = Backoff::new();

        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            match self.connect_once(&mut backoff).await {
                Ok(ConnectionEnd::UserStop) => return Ok(()),
                Ok(ConnectionEnd::Retry) => {}
                Err(e) => return Err(e),
            }

            let delay = backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => return Ok(()),
            }
        }
    }

    /// One pass through Connecting → Authenticating → Ready →
    /// Disconnecting. `Err` is fatal; `Ok(Retry)` re-enters with backoff.
    async fn connect_once(&mut self, backoff: &mut Backoff) -> Result<ConnectionEnd> {
        // Refresh the token each pass; the cache makes this cheap.
        let token = resolve_token(&self.config, &self.api).await?;
        self.api.set_token(&token);

        let url = match self.api.gateway().await {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "failed to fetch gateway URL");
                return Ok(ConnectionEnd::Retry);
            }
        };

        info!(url = %url, "connecting to gateway");
        let (ws, _) = match connect_async(&url).await {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "gateway connection failed");
                return Ok(ConnectionEnd::Retry);
            }
        };
        let (mut write, mut read) = ws.split();

        let identify = identify_frame(&token, &self.config.bot_name);
        if let Err(e) = write.send(WsMessage::Text(identify.to_string().into())).await {
            warn!(error = %e, "failed to send IDENTIFY");
            return Ok(ConnectionEnd::Retry);
        }
        debug!("sent IDENTIFY");

        let mut heartbeat_task: Option<tokio::task::JoinHandle<()>> = None;
        let end = loop {
            tokio::select! {
                // Outbound queue: heartbeat, dispatcher, facade.
                frame = self.outbound_rx.recv() => {
                    let Some(frame) = frame else { break ConnectionEnd::UserStop };
                    if let Err(e) = write.send(WsMessage::Text(frame.to_string().into())).await {
                        warn!(error = %e, "outbound send failed");
                        break ConnectionEnd::Retry;
                    }
                }

                message = read.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            let frame: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    error!(error = %e, "malformed gateway frame, dropping connection");
                                    break ConnectionEnd::Retry;
                                }
                            };
                            match self.dispatcher.dispatch(frame) {
                                Ok(DispatchOutcome::Handled) => {}
                                Ok(DispatchOutcome::SessionReady { heartbeat_interval }) => {
                                    info!(
                                        interval_ms = heartbeat_interval.as_millis() as u64,
                                        "session ready"
                                    );
                                    backoff.reset();
                                    self.heartbeat_active.store(true, Ordering::SeqCst);
                                    if let Some(task) = heartbeat_task.take() {
                                        task.abort();
                                    }
                                    heartbeat_task = Some(spawn_heartbeat(
                                        heartbeat_interval,
                                        self.outbound_tx.clone(),
                                        Arc::clone(&self.heartbeat_active),
                                    ));
                                }
                                Err(e) => {
                                    error!(error = %e, "protocol violation, dropping connection");
                                    break ConnectionEnd::Retry;
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            warn!(close = ?frame, "gateway closed the connection");
                            break ConnectionEnd::Retry;
                        }
                        // Ping, pong, binary: transport noise.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "gateway read error");
                            break ConnectionEnd::Retry;
                        }
                        None => {
                            info!("gateway stream ended");
                            break ConnectionEnd::Retry;
                        }
                    }
                }

                _ = self.shutdown.changed() => {
                    info!("session stop requested");
                    let _ = write.send(WsMessage::Close(None)).await;
                    break ConnectionEnd::UserStop;
                }
            }
        };

        // Disconnecting: heartbeat off, voice torn down.
        self.heartbeat_active.store(false, Ordering::SeqCst);
        if let Some(task) = heartbeat_task {
            task.abort();
        }
        self.voice.teardown();

        Ok(end)
    }
}

/// The heartbeat task: every interval, queue an op=1 frame carrying the
/// current Unix millisecond timestamp, as long as the gate is up.
fn spawn_heartbeat(
    interval: Duration,
    outbound: mpsc::UnboundedSender<serde_json::Value>,
    active: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !active.load(Ordering::SeqCst) {
                debug!("heartbeat gate down, task ending");
                return;
            }
            if outbound.send(heartbeat_frame()).is_err() {
                return;
            }
            debug!("queued heartbeat");
        }
    })
}
