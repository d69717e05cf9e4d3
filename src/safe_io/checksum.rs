//! Content hashing for records and documents.

use sha2::{Digest, Sha256};

/// Prefix identifying the digest algorithm.
pub const CHECKSUM_PREFIX: &str = "sha256:";

/// SHA-256 digest of `bytes`, rendered as `sha256:<hex>`.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = hasher.finalize();
    format!("{}{:x}", CHECKSUM_PREFIX, hash)
}

/// Whether `checksum` is the digest of `bytes`.
pub fn verify(bytes: &[u8], checksum: &str) -> bool {
    digest(bytes) == checksum
}
