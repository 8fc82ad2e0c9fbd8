//! Voice-session handshake state.
//!
//! The RTP/UDP voice transport itself is an external collaborator; this
//! module holds the credentials gathered during the gateway-side
//! handshake and the registry coordinating it: the facade records a
//! pending connect, the dispatcher completes it on VOICE_SERVER_UPDATE.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Credentials for an established voice session, gathered from
/// VOICE_STATE_UPDATE (session id) and VOICE_SERVER_UPDATE (token,
/// endpoint). Everything the voice transport needs to open its
/// connection.
#[derive(Debug, Clone)]
pub struct VoiceConnection {
    pub channel_id: u64,
    pub server_id: Option<u64>,
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
    pub encrypted: bool,
}

impl VoiceConnection {
    fn new(
        channel_id: u64,
        server_id: Option<u64>,
        session_id: String,
        token: String,
        endpoint: String,
        encrypted: bool,
    ) -> Self {
        info!(channel_id, endpoint = %endpoint, encrypted, "voice session established");
        Self {
            channel_id,
            server_id,
            session_id,
            token,
            endpoint,
            encrypted,
        }
    }
}

struct Pending {
    channel_id: u64,
    server_id: Option<u64>,
    encrypted: bool,
    tx: oneshot::Sender<Arc<VoiceConnection>>,
}

#[derive(Default)]
struct Inner {
    /// Bot's own voice session id, from VOICE_STATE_UPDATE.
    session_id: Option<String>,
    pending: Option<Pending>,
    active: Option<Arc<VoiceConnection>>,
}

/// Registry for the at-most-one voice session.
#[derive(Default)]
pub struct VoiceRegistry {
    inner: Mutex<Inner>,
}

impl VoiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the bot's voice session id from a VOICE_STATE_UPDATE.
    pub fn record_session_id(&self, session_id: &str) {
        self.inner.lock().session_id = Some(session_id.to_string());
    }

    /// Start a voice connect: tear down any existing session, record the
    /// target, and return the receiver the handshake completes on.
    pub fn begin_connect(
        &self,
        channel_id: u64,
        server_id: Option<u64>,
        encrypted: bool,
    ) -> oneshot::Receiver<Arc<VoiceConnection>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.active.take().is_some() {
            debug!("tearing down existing voice session before reconnect");
        }
        inner.pending = Some(Pending {
            channel_id,
            server_id,
            encrypted,
            tx,
        });
        rx
    }

    /// Complete a pending connect with the VOICE_SERVER_UPDATE
    /// credentials. Returns the new session, or `None` when no connect
    /// was pending.
    pub fn complete(&self, token: &str, endpoint: &str) -> Option<Arc<VoiceConnection>> {
        let mut inner = self.inner.lock();
        let pending = inner.pending.take()?;
        let session_id = inner.session_id.clone().unwrap_or_default();

        let connection = Arc::new(VoiceConnection::new(
            pending.channel_id,
            pending.server_id,
            session_id,
            token.to_string(),
            endpoint.to_string(),
            pending.encrypted,
        ));
        inner.active = Some(Arc::clone(&connection));
        // The waiter may have given up; the session stays active either way.
        let _ = pending.tx.send(Arc::clone(&connection));
        Some(connection)
    }

    /// Drop the active session and any pending connect.
    pub fn teardown(&self) -> Option<Arc<VoiceConnection>> {
        let mut inner = self.inner.lock();
        inner.pending = None;
        let active = inner.active.take();
        if active.is_some() {
            info!("voice session torn down");
        }
        active
    }

    /// The currently active session, if any.
    #[must_use]
    pub fn active(&self) -> Option<Arc<VoiceConnection>> {
        self.inner.lock().active.clone()
    }
}
