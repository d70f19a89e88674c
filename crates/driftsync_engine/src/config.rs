//! Configuration for the sync engine.

use driftsync_codec::CompressionConfig;
use std::time::Duration;

/// Name of the cache module that covers the whole application snapshot.
pub const ALL_DATA_MODULE: &str = "all_data";

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Name of the remote blob this device set writes.
    pub remote_name: String,
    /// Application version recorded in uploaded documents.
    pub app_version: String,
    /// A remote snapshot is imported only if it is newer than the local
    /// last-sync marker by more than this.
    pub import_tolerance: Duration,
    /// Debounce window for modules without their own.
    pub default_debounce: Duration,
    /// Content cache configuration.
    pub cache: CacheConfig,
    /// Adaptive scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Compression pipeline configuration.
    pub compression: CompressionConfig,
}

impl SyncConfig {
    /// Creates a configuration that writes to `remote_name`.
    pub fn new(remote_name: impl Into<String>) -> Self {
        Self {
            remote_name: remote_name.into(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            import_tolerance: Duration::from_secs(30),
            default_debounce: Duration::from_secs(2),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            compression: CompressionConfig::default(),
        }
    }

    /// Sets the application version recorded in uploads.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    /// Sets the import clock-skew tolerance.
    pub fn with_import_tolerance(mut self, tolerance: Duration) -> Self {
        self.import_tolerance = tolerance;
        self
    }

    /// Sets the default debounce window.
    pub fn with_default_debounce(mut self, debounce: Duration) -> Self {
        self.default_debounce = debounce;
        self
    }

    /// Sets the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the scheduler configuration.
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the compression configuration.
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("app-data.json")
    }
}

/// Hash function used for content addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 over the canonical JSON.
    #[default]
    Sha256,
    /// 64-bit FNV-1a. Degraded mode for targets without a usable SHA-256;
    /// collisions are possible, so only pick it deliberately.
    Fnv1a,
}

impl HashAlgorithm {
    /// Prefix written in front of hashes produced by this algorithm.
    pub fn prefix(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Fnv1a => "fnv1a",
        }
    }
}

/// Configuration for the content-addressable cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entries older than this (by creation time) are swept.
    pub ttl: Duration,
    /// An unchanged snapshot is still uploaded once its entry's last sync is
    /// older than this.
    pub periodic_backup: Duration,
    /// Aggregate size ceiling for all entries.
    pub max_total_bytes: u64,
    /// Fraction of the ceiling eviction shrinks the cache down to.
    pub eviction_target: f64,
    /// Hash function.
    pub hash_algorithm: HashAlgorithm,
    /// Keep the canonical snapshot bytes in each entry for diagnostics.
    pub retain_snapshots: bool,
}

impl CacheConfig {
    /// Sets the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the periodic backup age.
    pub fn with_periodic_backup(mut self, age: Duration) -> Self {
        self.periodic_backup = age;
        self
    }

    /// Sets the aggregate size ceiling.
    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    /// Sets the hash function.
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Sets whether snapshot bytes are retained in entries.
    pub fn with_retain_snapshots(mut self, retain: bool) -> Self {
        self.retain_snapshots = retain;
        self
    }

    /// Size the cache is shrunk to once it exceeds the ceiling.
    pub fn eviction_floor(&self) -> u64 {
        (self.max_total_bytes as f64 * self.eviction_target.clamp(0.0, 1.0)) as u64
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            periodic_backup: Duration::from_secs(6 * 60 * 60),
            max_total_bytes: 50 * 1024 * 1024,
            eviction_target: 0.8,
            hash_algorithm: HashAlgorithm::Sha256,
            retain_snapshots: true,
        }
    }
}

/// Configuration for the adaptive scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval while the user is active and changes are pending.
    pub active_interval: Duration,
    /// Interval with pending changes and an idle user; also the backoff base.
    pub min_interval: Duration,
    /// Upper bound for every interval.
    pub max_interval: Duration,
    /// Activity younger than this counts as "active use".
    pub activity_threshold: Duration,
    /// Interval changes up to this size do not re-arm the timer.
    pub hysteresis: Duration,
    /// Activity events closer together than this are dropped.
    pub activity_rate_limit: Duration,
}

impl SchedulerConfig {
    /// Sets the active-use interval.
    pub fn with_active_interval(mut self, interval: Duration) -> Self {
        self.active_interval = interval;
        self
    }

    /// Sets the idle interval and backoff base.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the maximum interval.
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Sets the activity threshold.
    pub fn with_activity_threshold(mut self, threshold: Duration) -> Self {
        self.activity_threshold = threshold;
        self
    }

    /// Sets the hysteresis band.
    pub fn with_hysteresis(mut self, hysteresis: Duration) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    /// Sets the activity rate limit.
    pub fn with_activity_rate_limit(mut self, limit: Duration) -> Self {
        self.activity_rate_limit = limit;
        self
    }

    /// Smallest interval the scheduler can ever use.
    pub fn floor(&self) -> Duration {
        self.active_interval.min(self.min_interval)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(2 * 60),
            max_interval: Duration::from_secs(10 * 60),
            activity_threshold: Duration::from_secs(5 * 60),
            hysteresis: Duration::from_secs(30),
            activity_rate_limit: Duration::from_secs(5),
        }
    }
}

/// Per-module tracking options.
#[derive(Debug, Clone, Default)]
pub struct ModuleOptions {
    /// Debounce window; `None` uses [`SyncConfig::default_debounce`].
    pub debounce: Option<Duration>,
    /// Top-level fields whose changes never count as a mutation.
    pub excluded_fields: Vec<String>,
}

impl ModuleOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    /// Excludes a top-level field from the change signal.
    pub fn exclude_field(mut self, field: impl Into<String>) -> Self {
        self.excluded_fields.push(field.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.remote_name, "app-data.json");
        assert_eq!(config.import_tolerance, Duration::from_secs(30));
        assert_eq!(config.default_debounce, Duration::from_secs(2));
        assert_eq!(config.compression.threshold, 1024);
        assert_eq!(config.compression.level, 6);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("backup.json")
            .with_app_version("9.9.9")
            .with_import_tolerance(Duration::from_secs(5))
            .with_default_debounce(Duration::from_millis(500));

        assert_eq!(config.remote_name, "backup.json");
        assert_eq!(config.app_version, "9.9.9");
        assert_eq!(config.import_tolerance, Duration::from_secs(5));
        assert_eq!(config.default_debounce, Duration::from_millis(500));
    }

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(86_400));
        assert_eq!(config.periodic_backup, Duration::from_secs(21_600));
        assert_eq!(config.max_total_bytes, 52_428_800);
        assert_eq!(config.eviction_floor(), 41_943_040);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.active_interval, Duration::from_secs(60));
        assert_eq!(config.min_interval, Duration::from_secs(120));
        assert_eq!(config.max_interval, Duration::from_secs(600));
        assert_eq!(config.floor(), Duration::from_secs(60));
    }

    #[test]
    fn module_options_builder() {
        let options = ModuleOptions::new()
            .with_debounce(Duration::from_secs(5))
            .exclude_field("timerRunning");
        assert_eq!(options.debounce, Some(Duration::from_secs(5)));
        assert_eq!(options.excluded_fields, vec!["timerRunning".to_string()]);
    }
}
