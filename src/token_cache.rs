//! On-disk cache of issued session tokens.
//!
//! Keyed by account identity, with a SHA-256 digest of the secret stored
//! alongside the token: a changed secret invalidates the cached token
//! without the secret itself ever touching disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    secret_digest: String,
    token: String,
}

/// A token cache persisted as a single JSON file.
#[derive(Debug)]
pub struct TokenCache {
    path: PathBuf,
    entries: HashMap<String, Entry>,
}

fn digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

impl TokenCache {
    /// Load the cache from `path`. A missing or unreadable file is
    /// treated as an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "token cache unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, entries }
    }

    /// The file this cache persists to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the cached token for `(identity, secret)`, or `None` on a
    /// miss or a secret mismatch.
    #[must_use]
    pub fn lookup(&self, identity: &str, secret: &str) -> Option<&str> {
        let entry = self.entries.get(identity)?;
        if entry.secret_digest == digest(secret) {
            Some(&entry.token)
        } else {
            debug!(identity, "token cache secret mismatch, ignoring entry");
            None
        }
    }

    /// Record a freshly issued token and persist the cache. A write
    /// failure is logged; the in-memory entry stays usable.
    pub fn store(&mut self, identity: &str, secret: &str, token: &str) {
        self.entries.insert(
            identity.to_string(),
            Entry {
                secret_digest: digest(secret),
                token: token.to_string(),
            },
        );
        match serde_json::to_string_pretty(&self.entries) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.path, raw) {
                    warn!(path = %self.path.display(), error = %e, "failed to persist token cache");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize token cache"),
        }
    }
}
