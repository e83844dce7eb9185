//! Content hashing.
//!
//! The dedup key of a cache record is the lowercase hex SHA-256 of the raw
//! blob bytes. Identical bytes under different display names or paths hash
//! to the same key and therefore share one remote upload.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `bytes` (64 lowercase characters).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Short prefix of a digest for log lines.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
