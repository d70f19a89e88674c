//! Content hashing over canonical snapshots.

use crate::config::HashAlgorithm;
use crate::error::{SyncError, SyncResult};
use driftsync_codec::to_canonical_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A content hash, written as `<algorithm>:<lowercase hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes already-canonical bytes.
    pub fn of_bytes(bytes: &[u8], algorithm: HashAlgorithm) -> Self {
        let hex = match algorithm {
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(bytes)),
            HashAlgorithm::Fnv1a => format!("{:016x}", fnv1a(bytes)),
        };
        Self(format!("{}:{hex}", algorithm.prefix()))
    }

    /// Wraps a hash string read back from storage or a remote document.
    pub fn from_string(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// The full hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this hash was produced in the degraded FNV mode.
    pub fn is_degraded(&self) -> bool {
        self.algorithm() == Some(HashAlgorithm::Fnv1a)
    }

    /// The algorithm named by the prefix, if it is a known one.
    pub fn algorithm(&self) -> Option<HashAlgorithm> {
        let (prefix, _) = self.0.split_once(':')?;
        [HashAlgorithm::Sha256, HashAlgorithm::Fnv1a]
            .into_iter()
            .find(|alg| alg.prefix() == prefix)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot in canonical form together with its hash.
#[derive(Debug, Clone)]
pub struct HashedSnapshot {
    /// Canonical JSON bytes.
    pub canonical: Vec<u8>,
    /// Hash of `canonical`.
    pub hash: ContentHash,
}

/// Canonicalizes and hashes a snapshot.
///
/// # Errors
///
/// Returns [`SyncError::CacheDegraded`] if the snapshot cannot be brought
/// into canonical form; callers treat that as "always sync".
pub fn hash_snapshot(snapshot: &Value, algorithm: HashAlgorithm) -> SyncResult<HashedSnapshot> {
    let canonical =
        to_canonical_json(snapshot).map_err(|e| SyncError::CacheDegraded(e.to_string()))?;
    let hash = ContentHash::of_bytes(&canonical, algorithm);
    Ok(HashedSnapshot { canonical, hash })
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}
