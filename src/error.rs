//! Error taxonomy for the client core.
//!
//! These are semantic categories, not transport stack types: REST and
//! WebSocket failures fold into [`Error::Transport`], and the session
//! manager decides recovery (reconnect, retry, surface) from the category
//! alone.

use thiserror::Error;

/// Errors surfaced by the client core.
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials rejected. Fatal; surfaces to the caller of `run`.
    #[error("invalid authentication")]
    InvalidAuthentication,

    /// The bot lacks rights on a resource.
    #[error("missing permission")]
    NoPermission,

    /// The id does not resolve to anything.
    #[error("not found")]
    NotFound,

    /// Rate limited; retrying is the caller's responsibility.
    #[error("rate limited, retry after {retry_after} seconds")]
    RateLimited { retry_after: f64 },

    /// Non-success HTTP status outside the mapped categories.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Network-level failure. Triggers the reconnect loop.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected op code or malformed frame. The connection is dropped.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl Error {
    /// Whether a failed login attempt should be retried.
    ///
    /// Transient per the login contract: any network fault (DNS
    /// resolution included) and HTTP 523; every other 4xx means the
    /// credentials themselves are bad.
    #[must_use]
    pub fn is_transient_login(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::HttpStatus(code) => *code == 523 || *code >= 500,
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient_for_login() {
        let err = Error::Transport("No such host is known.".into());
        assert!(err.is_transient_login());
    }

    #[test]
    fn http_523_is_transient_for_login() {
        assert!(Error::HttpStatus(523).is_transient_login());
        assert!(Error::HttpStatus(500).is_transient_login());
    }

    #[test]
    fn other_4xx_is_fatal_for_login() {
        assert!(!Error::HttpStatus(400).is_transient_login());
        assert!(!Error::InvalidAuthentication.is_transient_login());
        assert!(!Error::NoPermission.is_transient_login());
        assert!(!Error::RateLimited { retry_after: 1.0 }.is_transient_login());
    }
}
