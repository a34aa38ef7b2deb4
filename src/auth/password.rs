//! Salted password hashing.
//!
//! Digests are PBKDF2-HMAC-SHA256 in PHC string format
//! (`$pbkdf2-sha256$i=<rounds>,l=32$<salt>$<hash>`), so the salt and the
//! round count travel with the stored value and verification never needs
//! anything but the digest itself.

use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};

/// Default PBKDF2 round count for new digests.
pub const DEFAULT_HASH_ROUNDS: u32 = 100_000;

/// Lowest round count accepted when hashing.
const MIN_HASH_ROUNDS: u32 = 1_000;

/// Derived key length in bytes.
const OUTPUT_LENGTH: usize = 32;

/// Hashes and verifies user passwords.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    rounds: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_ROUNDS)
    }
}

impl PasswordHasher {
    /// Create a hasher producing digests with the given round count
    /// (raised to the minimum if lower).
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(MIN_HASH_ROUNDS),
        }
    }

    /// Hash a plaintext password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let params = Params {
            rounds: self.rounds,
            output_length: OUTPUT_LENGTH,
        };
        let digest =
            Pbkdf2.hash_password_customized(password.as_bytes(), None, None, params, &salt)?;
        Ok(digest.to_string())
    }

    /// Check a plaintext attempt against a stored digest.
    ///
    /// Returns `false` for a wrong password and for a digest that does not
    /// parse; never errors.
    pub fn verify(&self, password: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Pbkdf2.verify_password(password.as_bytes(), &parsed).is_ok()
    }
}

/// Whether a stored `senha` is a PHC digest. Stores written before
/// passwords were hashed hold the plaintext instead.
pub fn is_digest(stored: &str) -> bool {
    PasswordHash::new(stored).is_ok()
}

/// Compare an attempt against a stored plaintext password.
pub fn matches_plaintext(password: &str, stored: &str) -> bool {
    constant_time_eq(password.as_bytes(), stored.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
