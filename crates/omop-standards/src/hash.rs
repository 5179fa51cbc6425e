#![deny(unsafe_code)]

use std::path::Path;

use sha2::Digest;

use crate::error::StandardsError;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = sha2::Sha256::digest(bytes);
    hex::encode(digest)
}

/// SHA-256 of a file's contents, hex encoded.
pub fn sha256_file(path: &Path) -> Result<String, StandardsError> {
    let bytes = std::fs::read(path).map_err(|e| StandardsError::io(path, e))?;
    Ok(sha256_hex(&bytes))
}
