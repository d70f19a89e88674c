//! The JSON document stored in the remote blob.

use crate::error::{SyncError, SyncResult};
use crate::hash::{ContentHash, HashedSnapshot};
use crate::module::Snapshot;
use chrono::{DateTime, Utc};
use driftsync_codec::{compress_bytes, decompress_bytes, CompressionConfig, WireEnvelope};
use serde::{Deserialize, Serialize};

/// Current document format version.
pub const FORMAT_VERSION: u32 = 1;

/// An uploaded snapshot with the metadata needed to validate it on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    /// Document format version.
    pub format_version: u32,
    /// Uploading device.
    pub device_id: String,
    /// Version of the uploading application.
    pub app_version: String,
    /// Time the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Hash of the canonical snapshot inside `envelope`.
    pub content_hash: ContentHash,
    /// The snapshot, possibly compressed.
    pub envelope: WireEnvelope,
}

impl SnapshotDocument {
    /// Packs a hashed snapshot into a document.
    pub fn build(
        hashed: &HashedSnapshot,
        device_id: impl Into<String>,
        app_version: impl Into<String>,
        created_at: DateTime<Utc>,
        compression: &CompressionConfig,
    ) -> Self {
        let envelope = compress_bytes(hashed.canonical.clone(), compression);
        Self {
            format_version: FORMAT_VERSION,
            device_id: device_id.into(),
            app_version: app_version.into(),
            created_at,
            content_hash: hashed.hash.clone(),
            envelope: WireEnvelope::from_envelope(&envelope),
        }
    }

    /// Serializes the document for upload.
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SyncError::Persistence(e.to_string()))
    }

    /// Parses a downloaded document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ImportValidation`] for malformed documents and
    /// unsupported format versions.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        let doc: Self = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::ImportValidation(format!("malformed snapshot document: {e}")))?;
        if doc.format_version == 0 || doc.format_version > FORMAT_VERSION {
            return Err(SyncError::ImportValidation(format!(
                "unsupported format version {}",
                doc.format_version
            )));
        }
        Ok(doc)
    }

    /// Restores the snapshot and checks it against `content_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Compression`] if the envelope cannot be decoded
    /// and [`SyncError::ImportValidation`] if the hash does not match.
    pub fn decode(&self) -> SyncResult<Snapshot> {
        let envelope = self.envelope.to_envelope()?;
        let canonical = decompress_bytes(&envelope)?;

        let algorithm = self.content_hash.algorithm().ok_or_else(|| {
            SyncError::ImportValidation(format!("unknown hash {}", self.content_hash))
        })?;
        let actual = ContentHash::of_bytes(&canonical, algorithm);
        if actual != self.content_hash {
            return Err(SyncError::ImportValidation(format!(
                "content hash mismatch: expected {}, got {actual}",
                self.content_hash
            )));
        }

        serde_json::from_slice(&canonical)
            .map_err(|e| SyncError::ImportValidation(format!("snapshot is not JSON: {e}")))
    }
}
