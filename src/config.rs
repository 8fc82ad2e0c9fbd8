//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity used when no login is required: the secret *is* the token.
pub const TOKEN_IDENTITY: &str = "token";

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Account identity (email), or [`TOKEN_IDENTITY`] when `secret`
    /// already holds a session token.
    pub identity: String,

    /// Account secret (password), or the token itself.
    pub secret: String,

    /// Bot name, sent as the identity header on every REST request.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Base URL for the REST API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Where the token cache file lives.
    #[serde(default = "default_token_cache_path")]
    pub token_cache_path: PathBuf,

    /// REST request timeout.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Whether the bot's own messages are dispatched to handlers.
    #[serde(default)]
    pub parse_self: bool,

    /// Upper bound on concurrently running handler tasks.
    /// `None` means unbounded (one task per event handler invocation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_concurrency: Option<usize>,

    /// Login retry tuning.
    #[serde(default)]
    pub login_retry: LoginRetryConfig,
}

fn default_bot_name() -> String {
    "accord".into()
}

fn default_api_url() -> String {
    "https://discordapp.com/api".into()
}

fn default_token_cache_path() -> PathBuf {
    PathBuf::from("token_cache.json")
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Retry tuning for the login loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRetryConfig {
    /// Maximum login attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sleep between attempts, in seconds.
    #[serde(default = "default_retry_sleep_secs")]
    pub sleep_secs: u64,
}

fn default_max_attempts() -> u32 {
    100
}

fn default_retry_sleep_secs() -> u64 {
    5
}

impl Default for LoginRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            sleep_secs: default_retry_sleep_secs(),
        }
    }
}

impl ClientConfig {
    /// Configuration for an email/password account.
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            bot_name: default_bot_name(),
            api_url: default_api_url(),
            token_cache_path: default_token_cache_path(),
            timeout: default_timeout(),
            parse_self: false,
            handler_concurrency: None,
            login_retry: LoginRetryConfig::default(),
        }
    }

    /// Configuration for an account already holding a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(TOKEN_IDENTITY, token)
    }

    /// Whether the secret is a token rather than a password.
    #[must_use]
    pub fn uses_raw_token(&self) -> bool {
        self.identity == TOKEN_IDENTITY
    }
}
