//! In-memory session store and role guard.
//!
//! Clients hold an opaque hex token; the store only keeps its SHA-256
//! digest, so a dump of the map cannot be replayed as a cookie.

use super::AuthError;
use parking_lot::Mutex;
use password_hash::rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default session duration: 24 hours (seconds).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 3600;

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub perfil: String,
    /// Unix seconds after which the session is dead. `None` never expires.
    pub expires_at: Option<u64>,
}

impl Session {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Server-side session storage keyed by token digest.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    /// Zero disables expiry.
    ttl_secs: u64,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// Open a session for an authenticated user.
    /// Returns the plaintext token (only revealed once).
    pub fn create(&self, user_id: &str, perfil: &str) -> String {
        let token = generate_token();
        // A TTL too large to represent as a deadline never expires
        let expires_at = match self.ttl_secs {
            0 => None,
            ttl => epoch_secs().checked_add(ttl),
        };

        self.sessions.lock().insert(
            hash_token(&token),
            Session {
                user_id: user_id.to_owned(),
                perfil: perfil.to_owned(),
                expires_at,
            },
        );
        token
    }

    /// Look up a live session. Expired entries are dropped on sight.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let key = hash_token(token);
        let now = epoch_secs();

        let mut sessions = self.sessions.lock();
        match sessions.get(&key) {
            Some(session) if session.is_live(now) => Some(session.clone()),
            Some(_) => {
                sessions.remove(&key);
                None
            }
            None => None,
        }
    }

    /// End a session. Returns whether the token named a live session.
    pub fn revoke(&self, token: &str) -> bool {
        let now = epoch_secs();
        self.sessions
            .lock()
            .remove(&hash_token(token))
            .is_some_and(|session| session.is_live(now))
    }

    /// End every session belonging to a user.
    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.user_id != user_id);
        before - sessions.len()
    }

    /// Drop expired sessions.
    pub fn cleanup_expired(&self) -> usize {
        let now = epoch_secs();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.is_live(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Guard for protected operations: the caller must hold a live session
    /// whose role equals `perfil`.
    pub fn require_role(&self, token: Option<&str>, perfil: &str) -> Result<Session, AuthError> {
        let session = token
            .and_then(|token| self.validate(token))
            .ok_or(AuthError::Unauthenticated)?;

        if session.perfil != perfil {
            return Err(AuthError::Forbidden);
        }
        Ok(session)
    }
}

/// Generate a random session token (hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a session token (SHA-256, single pass; tokens are already high-entropy).
fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
