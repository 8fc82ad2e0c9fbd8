//! accord — a single-shard Discord gateway client core.
//!
//! The crate covers the long-lived bidirectional session between a bot
//! process and the real-time messaging service:
//! - authenticated session establishment with a reconnect/backoff loop
//! - the gateway protocol state machine and heartbeat scheduler
//! - dispatch of server-pushed events into an in-process entity cache
//! - fan-out to registered handlers and one-shot keyed awaits
//! - the voice-session handshake (credentials only; the RTP transport is
//!   an external collaborator)
//!
//! Consumed as a library: construct a [`ClientConfig`], build a
//! [`Client`], register handlers, and call [`Client::run`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod api;
mod bus;
mod cache;
mod client;
mod config;
mod dispatch;
mod error;
mod event;
mod gateway;
mod token_cache;
mod types;
mod voice;

pub use api::ApiClient;
pub use bus::{EventBus, Handler, HandlerId, Predicate};
pub use cache::CacheStore;
pub use client::Client;
pub use config::{ClientConfig, LoginRetryConfig, TOKEN_IDENTITY};
pub use dispatch::{DispatchKind, DispatchOutcome, Dispatcher, Opcode};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use token_cache::TokenCache;
pub use types::{
    Attachment, Channel, ChannelKind, GatewayPayload, Invite, Message, MessageDeletePayload,
    MessageEditPayload, OnlineStatus, PermissionOverwrite, Profile, Role, Server, ServerPayload,
    TypingPayload, User, VoiceState,
};
pub use voice::{VoiceConnection, VoiceRegistry};
