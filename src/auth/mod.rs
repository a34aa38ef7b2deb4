//! Password hashing and session-based authorization.
//!
//! Provides:
//! - Salted PBKDF2 password digests (PHC strings, salt embedded)
//! - Opaque session tokens, SHA-256 hashed for storage, optionally time-limited
//! - A role guard for admin-only operations

pub mod password;
pub mod session;

pub use password::PasswordHasher;
pub use session::{Session, SessionStore};

/// Why a protected operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no active session")]
    Unauthenticated,
    #[error("session role is not allowed to perform this operation")]
    Forbidden,
}
