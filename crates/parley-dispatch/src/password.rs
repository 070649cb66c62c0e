//! Salted password hashing.
//!
//! Stored form is `salt ‖ SHA-256(salt ‖ password)` - opaque bytes to
//! everything but this module. Verification is constant-time.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;

/// Hashes a password with a fresh random salt.
pub fn hash(password: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut out = Vec::with_capacity(SALT_LEN + DIGEST_LEN);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&digest(&salt, password));
    out
}

/// Verifies a password against a stored hash.
///
/// Returns false for malformed stored bytes rather than erroring; a
/// truncated hash can only come from store corruption and must read as a
/// failed login, not a crash.
pub fn verify(password: &str, stored: &[u8]) -> bool {
    if stored.len() != SALT_LEN + DIGEST_LEN {
        return false;
    }
    let (salt, expected) = stored.split_at(SALT_LEN);
    digest(salt, password).ct_eq(expected).into()
}

fn digest(salt: &[u8], password: &str) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}
