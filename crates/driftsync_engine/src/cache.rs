//! Content-addressable cache deciding whether a snapshot needs uploading.

use crate::config::CacheConfig;
use crate::error::{SyncError, SyncResult};
use crate::hash::{hash_snapshot, ContentHash, HashedSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Version tag of the persisted cache layout.
const PERSISTED_CACHE_VERSION: u32 = 1;

/// One cache entry per logical module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash of the last successfully synced snapshot.
    pub content_hash: ContentHash,
    /// Canonical bytes of that snapshot, kept for diagnostics only.
    pub snapshot: Option<Vec<u8>>,
    /// When the entry was first created.
    pub created_at: DateTime<Utc>,
    /// When the module was last synced.
    pub last_synced_at: DateTime<Utc>,
    /// Number of successful syncs recorded.
    pub sync_count: u64,
    /// Size of the canonical snapshot in bytes.
    pub size_bytes: u64,
}

/// Counters describing cache behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Decisions where the snapshot was unchanged.
    pub hits: u64,
    /// Decisions where the snapshot was new or modified.
    pub misses: u64,
    /// Entries removed under size pressure.
    pub evictions: u64,
    /// Entries removed by the TTL sweep.
    pub expirations: u64,
    /// Decisions made without a usable hash.
    pub degraded: u64,
}

/// Why a sync decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// No entry exists for the module (first sync or evicted).
    NoCacheEntry,
    /// The hash changed since the last sync.
    Modified,
    /// Unchanged, but the last sync is older than the backup period.
    PeriodicBackup,
    /// Unchanged and recently synced.
    Unchanged,
    /// The snapshot could not be hashed; syncing to be safe.
    HashUnavailable,
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncReason::NoCacheEntry => "no cache entry",
            SyncReason::Modified => "modified",
            SyncReason::PeriodicBackup => "periodic backup",
            SyncReason::Unchanged => "unchanged",
            SyncReason::HashUnavailable => "hash unavailable",
        })
    }
}

/// Outcome of [`ContentCache::should_sync`].
#[derive(Debug, Clone)]
pub struct SyncDecision {
    /// Whether the snapshot should be uploaded.
    pub should_sync: bool,
    /// Whether the content differs from the cached entry.
    pub changed: bool,
    /// Why.
    pub reason: SyncReason,
    /// The canonical snapshot and its hash; `None` in degraded mode.
    pub hashed: Option<HashedSnapshot>,
}

impl SyncDecision {
    /// The snapshot hash, if one could be computed.
    pub fn hash(&self) -> Option<&ContentHash> {
        self.hashed.as_ref().map(|h| &h.hash)
    }
}

/// Serialized form of the cache kept in local storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCache {
    /// Layout version.
    pub version: u32,
    /// Entries by module name.
    pub entries: BTreeMap<String, CacheEntry>,
    /// Statistics.
    pub stats: CacheStats,
}

impl PersistedCache {
    /// Encodes to CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] if encoding fails.
    pub fn to_cbor(&self) -> SyncResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| SyncError::Persistence(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR, rejecting unknown layout versions.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Persistence`] for corrupt or foreign data.
    pub fn from_cbor(bytes: &[u8]) -> SyncResult<Self> {
        let cache: Self =
            ciborium::de::from_reader(bytes).map_err(|e| SyncError::Persistence(e.to_string()))?;
        if cache.version != PERSISTED_CACHE_VERSION {
            return Err(SyncError::Persistence(format!(
                "unsupported cache version {}",
                cache.version
            )));
        }
        Ok(cache)
    }
}

/// Per-module cache of the last synced content hash.
///
/// The cache is pure bookkeeping; the owner persists it through
/// [`ContentCache::to_persisted`] after every mutation.
#[derive(Debug)]
pub struct ContentCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl ContentCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Restores a cache from its persisted form, dropping expired entries.
    pub fn from_persisted(config: CacheConfig, persisted: PersistedCache, now: DateTime<Utc>) -> Self {
        let mut cache = Self {
            config,
            entries: persisted.entries.into_iter().collect(),
            stats: persisted.stats,
        };
        cache.sweep_expired(now);
        cache
    }

    /// Snapshot of the cache for persistence.
    pub fn to_persisted(&self) -> PersistedCache {
        PersistedCache {
            version: PERSISTED_CACHE_VERSION,
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stats: self.stats.clone(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Returns the entry for `module`.
    pub fn entry(&self, module: &str) -> Option<&CacheEntry> {
        self.entries.get(module)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate size of all entries.
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Decides whether `snapshot` must be synced for `module`.
    pub fn should_sync(&mut self, module: &str, snapshot: &Value, now: DateTime<Utc>) -> SyncDecision {
        match hash_snapshot(snapshot, self.config.hash_algorithm) {
            Ok(hashed) => self.decide(module, hashed, now),
            Err(e) => {
                tracing::warn!(module, error = %e, "hashing unavailable, forcing sync");
                self.stats.degraded += 1;
                SyncDecision {
                    should_sync: true,
                    changed: true,
                    reason: SyncReason::HashUnavailable,
                    hashed: None,
                }
            }
        }
    }

    /// Decides for a snapshot that has already been hashed.
    pub fn decide(&mut self, module: &str, hashed: HashedSnapshot, now: DateTime<Utc>) -> SyncDecision {
        let (should_sync, changed, reason) = match self.entries.get(module) {
            None => (true, true, SyncReason::NoCacheEntry),
            Some(entry) if entry.content_hash == hashed.hash => {
                if older_than(now, entry.last_synced_at, self.config.periodic_backup) {
                    (true, false, SyncReason::PeriodicBackup)
                } else {
                    (false, false, SyncReason::Unchanged)
                }
            }
            Some(_) => (true, true, SyncReason::Modified),
        };

        if changed {
            self.stats.misses += 1;
        } else {
            self.stats.hits += 1;
        }

        SyncDecision {
            should_sync,
            changed,
            reason,
            hashed: Some(hashed),
        }
    }

    /// Records a successful sync of `module`.
    ///
    /// Returns the modules evicted to get back under the size ceiling. The
    /// entry just written is never evicted.
    pub fn update(&mut self, module: &str, hashed: &HashedSnapshot, now: DateTime<Utc>) -> Vec<String> {
        let size_bytes = hashed.canonical.len() as u64;
        let snapshot = self
            .config
            .retain_snapshots
            .then(|| hashed.canonical.clone());

        match self.entries.get_mut(module) {
            Some(entry) => {
                entry.content_hash = hashed.hash.clone();
                entry.snapshot = snapshot;
                entry.last_synced_at = now;
                entry.sync_count += 1;
                entry.size_bytes = size_bytes;
            }
            None => {
                self.entries.insert(
                    module.to_string(),
                    CacheEntry {
                        content_hash: hashed.hash.clone(),
                        snapshot,
                        created_at: now,
                        last_synced_at: now,
                        sync_count: 1,
                        size_bytes,
                    },
                );
            }
        }

        self.evict_for_size(module)
    }

    /// Removes entries whose creation time is older than the TTL.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !older_than(now, entry.created_at, ttl));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "expired cache entries");
            self.stats.expirations += removed as u64;
        }
        removed
    }

    /// Removes the entry for `module`.
    pub fn remove(&mut self, module: &str) -> Option<CacheEntry> {
        self.entries.remove(module)
    }

    /// Removes all entries. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_for_size(&mut self, keep: &str) -> Vec<String> {
        let mut total = self.total_size();
        if total <= self.config.max_total_bytes {
            return Vec::new();
        }

        let floor = self.config.eviction_floor();
        let mut candidates: Vec<(String, DateTime<Utc>, u64)> = self
            .entries
            .iter()
            .filter(|(name, _)| name.as_str() != keep)
            .map(|(name, e)| (name.clone(), e.created_at, e.size_bytes))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut evicted = Vec::new();
        for (name, _, size) in candidates {
            if total <= floor {
                break;
            }
            self.entries.remove(&name);
            total = total.saturating_sub(size);
            evicted.push(name);
        }

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), total, "evicted cache entries");
            self.stats.evictions += evicted.len() as u64;
        }
        evicted
    }
}

/// True if `then` lies more than `limit` before `now`. A `then` in the
/// future (clock moved backwards) never counts as old.
pub(crate) fn older_than(now: DateTime<Utc>, then: DateTime<Utc>, limit: Duration) -> bool {
    match (now - then).to_std() {
        Ok(age) => age > limit,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashAlgorithm;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn hours(h: i64) -> chrono::Duration {
        chrono::Duration::hours(h)
    }

    fn hashed(value: &Value) -> HashedSnapshot {
        hash_snapshot(value, HashAlgorithm::Sha256).unwrap()
    }

    #[test]
    fn first_sync_has_no_entry() {
        let mut cache = ContentCache::new(CacheConfig::default());
        let decision = cache.should_sync("all_data", &json!({"a": 1}), t0());

        assert!(decision.should_sync);
        assert!(decision.changed);
        assert_eq!(decision.reason, SyncReason::NoCacheEntry);
        assert_eq!(decision.reason.to_string(), "no cache entry");
        assert!(decision.hash().is_some());
    }

    #[test]
    fn unchanged_recent_snapshot_is_skipped() {
        let mut cache = ContentCache::new(CacheConfig::default());
        let snapshot = json!({"tasks": [1, 2, 3]});
        cache.update("all_data", &hashed(&snapshot), t0());

        let decision = cache.should_sync("all_data", &snapshot, t0() + hours(5));
        assert!(!decision.should_sync);
        assert!(!decision.changed);
        assert_eq!(decision.reason, SyncReason::Unchanged);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn unchanged_old_snapshot_is_backed_up() {
        let mut cache = ContentCache::new(CacheConfig::default());
        let snapshot = json!({"tasks": [1, 2, 3]});
        cache.update("all_data", &hashed(&snapshot), t0());

        let decision = cache.should_sync("all_data", &snapshot, t0() + hours(7));
        assert!(decision.should_sync);
        assert!(!decision.changed);
        assert_eq!(decision.reason, SyncReason::PeriodicBackup);
        assert_eq!(decision.reason.to_string(), "periodic backup");
    }

    #[test]
    fn modified_snapshot_is_synced() {
        let mut cache = ContentCache::new(CacheConfig::default());
        cache.update("all_data", &hashed(&json!({"a": 1})), t0());

        let decision = cache.should_sync("all_data", &json!({"a": 2}), t0());
        assert!(decision.should_sync);
        assert!(decision.changed);
        assert_eq!(decision.reason, SyncReason::Modified);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn update_tracks_counts_and_times() {
        let mut cache = ContentCache::new(CacheConfig::default());
        cache.update("all_data", &hashed(&json!({"a": 1})), t0());
        cache.update("all_data", &hashed(&json!({"a": 2})), t0() + hours(1));

        let entry = cache.entry("all_data").unwrap();
        assert_eq!(entry.sync_count, 2);
        assert_eq!(entry.created_at, t0());
        assert_eq!(entry.last_synced_at, t0() + hours(1));
        assert_eq!(entry.snapshot.as_deref(), Some(br#"{"a":2}"#.as_slice()));
        assert_eq!(entry.size_bytes, 7);
    }

    #[test]
    fn snapshots_not_retained_when_disabled() {
        let mut cache = ContentCache::new(CacheConfig::default().with_retain_snapshots(false));
        cache.update("all_data", &hashed(&json!({"a": 1})), t0());
        assert!(cache.entry("all_data").unwrap().snapshot.is_none());
        assert_eq!(cache.total_size(), 7);
    }

    #[test]
    fn ttl_sweep_removes_old_entries() {
        let mut cache = ContentCache::new(CacheConfig::default());
        cache.update("old", &hashed(&json!(1)), t0());
        cache.update("new", &hashed(&json!(2)), t0() + hours(20));

        assert_eq!(cache.sweep_expired(t0() + hours(25)), 1);
        assert!(cache.entry("old").is_none());
        assert!(cache.entry("new").is_some());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn size_pressure_evicts_oldest_first() {
        // Each entry is 12 bytes of canonical JSON: "xxxxxxxxxx" with quotes.
        let config = CacheConfig::default().with_max_total_bytes(40);
        let mut cache = ContentCache::new(config);
        let value = json!("xxxxxxxxxx");

        cache.update("a", &hashed(&value), t0());
        cache.update("b", &hashed(&value), t0() + hours(1));
        cache.update("c", &hashed(&value), t0() + hours(2));
        assert_eq!(cache.total_size(), 36);

        // 48 > 40: shrink to <= 32 by dropping the oldest entries.
        let evicted = cache.update("d", &hashed(&value), t0() + hours(3));
        assert_eq!(evicted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.total_size(), 24);
        assert_eq!(cache.stats().evictions, 2);
        assert!(cache.entry("c").is_some());
        assert!(cache.entry("d").is_some());
    }

    #[test]
    fn eviction_never_drops_the_entry_just_written() {
        let config = CacheConfig::default().with_max_total_bytes(4);
        let mut cache = ContentCache::new(config);

        let evicted = cache.update("all_data", &hashed(&json!({"big": "value"})), t0());
        assert!(evicted.is_empty());
        assert!(cache.entry("all_data").is_some());
    }

    #[test]
    fn fnv_mode_still_detects_changes() {
        let config = CacheConfig::default().with_hash_algorithm(HashAlgorithm::Fnv1a);
        let mut cache = ContentCache::new(config);

        let first = cache.should_sync("all_data", &json!({"a": 1}), t0());
        assert!(first.hash().unwrap().is_degraded());
        cache.update("all_data", first.hashed.as_ref().unwrap(), t0());

        let same = cache.should_sync("all_data", &json!({"a": 1}), t0());
        assert_eq!(same.reason, SyncReason::Unchanged);
        let changed = cache.should_sync("all_data", &json!({"a": 2}), t0());
        assert_eq!(changed.reason, SyncReason::Modified);
    }

    #[test]
    fn persisted_round_trip() {
        let mut cache = ContentCache::new(CacheConfig::default());
        cache.update("all_data", &hashed(&json!({"a": 1})), t0());
        let _ = cache.should_sync("all_data", &json!({"a": 1}), t0());

        let bytes = cache.to_persisted().to_cbor().unwrap();
        let restored = ContentCache::from_persisted(
            CacheConfig::default(),
            PersistedCache::from_cbor(&bytes).unwrap(),
            t0() + hours(1),
        );

        assert_eq!(restored.entry("all_data"), cache.entry("all_data"));
        assert_eq!(restored.stats(), cache.stats());
    }

    #[test]
    fn restoring_drops_expired_entries() {
        let mut cache = ContentCache::new(CacheConfig::default());
        cache.update("all_data", &hashed(&json!({"a": 1})), t0());

        let restored = ContentCache::from_persisted(
            CacheConfig::default(),
            cache.to_persisted(),
            t0() + hours(30),
        );
        assert!(restored.is_empty());
    }

    #[test]
    fn corrupt_persisted_cache_is_rejected() {
        assert!(PersistedCache::from_cbor(b"\xff\x00garbage").is_err());

        let mut persisted = ContentCache::new(CacheConfig::default()).to_persisted();
        persisted.version = 99;
        let bytes = persisted.to_cbor().unwrap();
        assert!(matches!(
            PersistedCache::from_cbor(&bytes),
            Err(SyncError::Persistence(_))
        ));
    }

    #[test]
    fn clock_moving_backwards_is_not_old() {
        assert!(!older_than(t0(), t0() + hours(10), Duration::from_secs(1)));
        assert!(older_than(t0() + hours(10), t0(), Duration::from_secs(1)));
    }
}
