//! Content hashing for binary integrity checks.
//!
//! Hashes are SHA-256, hex-encoded. The "short hash" carried across the
//! process boundary in [`crate::core::ENV_SHORT_BIN_HASH`] is the LAST 8
//! hex characters of the full digest - enough to catch launch/binary
//! mismatches, not a security boundary (the hash is visible in the
//! environment).

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Number of hex characters in a short hash.
pub const SHORT_HASH_LEN: usize = 8;

/// Read buffer size for streaming hashes (1 MiB).
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Compute the hex-encoded SHA-256 digest of a file, streaming in chunks
/// so multi-hundred-megabyte binaries never land in memory whole.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("failed to read {} while hashing", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hex-encoded SHA-256 of an in-memory byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// The last [`SHORT_HASH_LEN`] characters of a full hex digest.
///
/// Digests shorter than that are returned unchanged.
pub fn short_hash(full: &str) -> &str {
    let start = full.len().saturating_sub(SHORT_HASH_LEN);
    &full[start..]
}
