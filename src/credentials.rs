//! Salted secret hashing
//!
//! Stored form is `salt$hex(sha256(salt || secret))`.

use sha2::{Digest, Sha256};
use std::fmt::Write;
use uuid::Uuid;

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

/// Hash a secret with a fresh random salt
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let hash = digest(&salt, secret);
    format!("{salt}${hash}")
}

/// Check a secret against a stored hash, malformed hashes never match
#[must_use]
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let actual = digest(salt, secret);
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
