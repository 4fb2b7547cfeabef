//! Password Hashing
//!
//! Thin wrapper around bcrypt. Plaintext passwords never leave this module's
//! callers; only digests are stored on users.

use bcrypt::{hash as bcrypt_hash, verify as bcrypt_verify, BcryptError, DEFAULT_COST};

/// Hash a plaintext password into a storable digest.
///
/// Bcrypt work happens on the calling thread; callers on async paths should
/// wrap this in `spawn_blocking`.
pub fn hash(plaintext: &str) -> Result<String, BcryptError> {
    bcrypt_hash(plaintext, DEFAULT_COST)
}

/// Check a plaintext password against a stored digest.
///
/// A malformed digest counts as a mismatch rather than an error; the caller
/// only ever needs to know whether the login may proceed.
pub fn verify(plaintext: &str, digest: &str) -> bool {
    bcrypt_verify(plaintext, digest).unwrap_or(false)
}
