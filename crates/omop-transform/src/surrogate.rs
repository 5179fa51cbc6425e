//! Deterministic surrogate keys.
//!
//! A key is the first 8 bytes (big-endian) of
//! `SHA-256(trial ␟ namespace ␟ part ␟ part ...)`, masked to 63 bits so it is
//! always a non-negative `bigint`. The same natural key always yields the
//! same identifier, which makes truncate-and-reload idempotent.

use sha2::{Digest, Sha256};

const UNIT_SEPARATOR: u8 = 0x1f;

pub fn surrogate_key(trial: &str, namespace: &str, parts: &[&str]) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(trial.as_bytes());
    hasher.update([UNIT_SEPARATOR]);
    hasher.update(namespace.as_bytes());
    for part in parts {
        hasher.update([UNIT_SEPARATOR]);
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) & (i64::MAX as u64)) as i64
}
