//! Inspect command implementation.

use super::CommandError;
use chrono::{DateTime, Utc};
use driftsync_engine::{CacheStats, LocalState, PersistedCache};
use driftsync_storage::FileStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// State inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// State directory.
    pub path: String,
    /// Device id, if one has been generated.
    pub device_id: Option<String>,
    /// Last successful sync or import.
    pub last_sync: Option<DateTime<Utc>>,
    /// Whether a readable cache is stored.
    pub cache_present: bool,
    /// Cache entries by module.
    pub entries: Vec<EntrySummary>,
    /// Total size of cached snapshots in bytes.
    pub total_size: u64,
    /// Cache counters.
    pub stats: CacheStats,
}

/// One cache entry, without the retained snapshot bytes.
#[derive(Debug, Serialize)]
pub struct EntrySummary {
    /// Module name.
    pub module: String,
    /// Hash of the last synced content.
    pub content_hash: String,
    /// Canonical snapshot size in bytes.
    pub size_bytes: u64,
    /// Number of successful syncs.
    pub sync_count: u64,
    /// First sync.
    pub created_at: DateTime<Utc>,
    /// Most recent sync.
    pub last_synced_at: DateTime<Utc>,
    /// Whether the snapshot bytes were retained.
    pub snapshot_retained: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CommandError::NoState(path.to_path_buf()).into());
    }

    let store = FileStore::open(path)?;
    let state = LocalState::new(Arc::new(store));
    let cache = state.load_cache();

    let mut result = InspectResult {
        path: path.display().to_string(),
        device_id: state.read_device_id().map(|id| id.to_string()),
        last_sync: state.last_sync(),
        cache_present: cache.is_some(),
        entries: Vec::new(),
        total_size: 0,
        stats: CacheStats::default(),
    };

    if let Some(PersistedCache { entries, stats, .. }) = cache {
        result.total_size = entries.values().map(|e| e.size_bytes).sum();
        result.entries = entries
            .into_iter()
            .map(|(module, entry)| EntrySummary {
                module,
                content_hash: entry.content_hash.to_string(),
                size_bytes: entry.size_bytes,
                sync_count: entry.sync_count,
                created_at: entry.created_at,
                last_synced_at: entry.last_synced_at,
                snapshot_retained: entry.snapshot.is_some(),
            })
            .collect();
        result.stats = stats;
    }

    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Sync State: {}", result.path);
    println!();
    println!(
        "Device ID:  {}",
        result.device_id.as_deref().unwrap_or("(not assigned)")
    );
    match result.last_sync {
        Some(at) => println!("Last sync:  {}", at.to_rfc3339()),
        None => println!("Last sync:  never"),
    }
    println!();

    if !result.cache_present {
        println!("Cache: empty");
        return;
    }

    println!("Cache:");
    println!("  Entries:     {}", result.entries.len());
    println!("  Total size:  {}", format_bytes(result.total_size));
    println!(
        "  Hits/misses: {}/{}",
        result.stats.hits, result.stats.misses
    );
    println!(
        "  Evicted:     {} (size) {} (ttl)",
        result.stats.evictions, result.stats.expirations
    );
    if result.stats.degraded > 0 {
        println!("  Degraded:    {}", result.stats.degraded);
    }

    for entry in &result.entries {
        println!();
        println!("  {}", entry.module);
        println!("    Hash:        {}", entry.content_hash);
        println!("    Size:        {}", format_bytes(entry.size_bytes));
        println!("    Syncs:       {}", entry.sync_count);
        println!("    Created:     {}", entry.created_at.to_rfc3339());
        println!("    Last synced: {}", entry.last_synced_at.to_rfc3339());
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_engine::{hash_snapshot, CacheConfig, ContentCache, HashAlgorithm};
    use serde_json::json;

    #[test]
    fn fresh_directory_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let result = inspect(dir.path()).unwrap();
        assert!(result.device_id.is_none());
        assert!(result.last_sync.is_none());
        assert!(!result.cache_present);
        assert!(result.entries.is_empty());
    }

    #[test]
    fn reports_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let now: DateTime<Utc> = "2024-09-02T07:30:00Z".parse().unwrap();
        let device_id = {
            let state = LocalState::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            let id = state.device_id().unwrap();
            state.set_last_sync(now).unwrap();

            let mut cache = ContentCache::new(CacheConfig::default());
            let hashed =
                hash_snapshot(&json!({"profile": {"name": "Ada"}}), HashAlgorithm::Sha256)
                    .unwrap();
            cache.update("all_data", &hashed, now);
            state.save_cache(&cache.to_persisted()).unwrap();
            id
        };

        let result = inspect(dir.path()).unwrap();
        assert_eq!(result.device_id, Some(device_id.to_string()));
        assert_eq!(result.last_sync, Some(now));
        assert!(result.cache_present);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].module, "all_data");
        assert_eq!(result.entries[0].sync_count, 1);
        assert!(result.entries[0].content_hash.starts_with("sha256:"));
        assert_eq!(result.total_size, result.entries[0].size_bytes);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
