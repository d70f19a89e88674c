//! Persisted per-device state: device id, last-sync marker, content cache.

use crate::cache::PersistedCache;
use crate::error::SyncResult;
use chrono::{DateTime, SecondsFormat, Utc};
use driftsync_storage::KeyValueStore;
use std::sync::Arc;
use uuid::Uuid;

/// Key holding the device UUID.
pub const DEVICE_ID_KEY: &str = "device-id";
/// Key holding the ISO-8601 last-sync timestamp.
pub const LAST_SYNC_KEY: &str = "last-sync-timestamp";
/// Key holding the CBOR-encoded content cache.
pub const CACHE_SNAPSHOT_KEY: &str = "cache-snapshot";

/// Typed access to the engine's durable local state.
///
/// Unreadable values are treated as absent: a corrupted last-sync marker
/// reads as "never synced", a corrupted cache as "empty cache".
#[derive(Clone)]
pub struct LocalState {
    store: Arc<dyn KeyValueStore>,
}

impl LocalState {
    /// Wraps a key-value store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Returns the device id, generating and storing one on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if a new id cannot be stored.
    pub fn device_id(&self) -> SyncResult<Uuid> {
        if let Some(id) = self.read_device_id() {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        self.store.put(DEVICE_ID_KEY, id.to_string().as_bytes())?;
        tracing::info!(device_id = %id, "generated device id");
        Ok(id)
    }

    /// Returns the stored device id without generating one.
    pub fn read_device_id(&self) -> Option<Uuid> {
        let bytes = self.read(DEVICE_ID_KEY)?;
        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok());
        if parsed.is_none() {
            tracing::warn!("stored device id is corrupted, ignoring it");
        }
        parsed
    }

    /// Returns the last successful sync or import time.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        let bytes = self.read(LAST_SYNC_KEY)?;
        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc));
        if parsed.is_none() {
            tracing::warn!("stored last-sync timestamp is corrupted, ignoring it");
        }
        parsed
    }

    /// Stores the last-sync marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn set_last_sync(&self, at: DateTime<Utc>) -> SyncResult<()> {
        let text = at.to_rfc3339_opts(SecondsFormat::Millis, true);
        self.store.put(LAST_SYNC_KEY, text.as_bytes())?;
        Ok(())
    }

    /// Loads the persisted cache, if a readable one exists.
    pub fn load_cache(&self) -> Option<PersistedCache> {
        let bytes = self.read(CACHE_SNAPSHOT_KEY)?;
        match PersistedCache::from_cbor(&bytes) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted cache");
                None
            }
        }
    }

    /// Stores the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn save_cache(&self, cache: &PersistedCache) -> SyncResult<()> {
        let bytes = cache.to_cbor()?;
        self.store.put(CACHE_SNAPSHOT_KEY, &bytes)?;
        Ok(())
    }

    /// Removes the persisted cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_cache(&self) -> SyncResult<bool> {
        Ok(self.store.delete(CACHE_SNAPSHOT_KEY)?)
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read local state");
                None
            }
        }
    }
}

impl std::fmt::Debug for LocalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalState").finish_non_exhaustive()
    }
}
