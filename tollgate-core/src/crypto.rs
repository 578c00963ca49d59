//! Password hashing for the credential store
//!
//! Stored credentials use the legacy scheme of the login log this guard was built around:
//! the hex-encoded SHA-256 of `"{password}:{salt}"`. Verification recomputes the hash and
//! compares it in constant time so the comparison does not leak how many leading
//! characters matched.

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compute the stored hash for a password and salt.
pub fn calculate_password_hash(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a candidate password against a stored salted hash.
pub fn verify_password(candidate: &str, salt: &str, stored_hash: &str) -> bool {
    let computed_hash = calculate_password_hash(candidate, salt);
    constant_time_compare(computed_hash.as_bytes(), stored_hash.as_bytes())
}

/// Generate a random 128-bit salt, hex encoded.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Perform constant-time comparison of two byte slices.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
