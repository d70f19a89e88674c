//! The sync orchestrator.
//!
//! [`SyncService`] ties the pieces together: it snapshots every registered
//! module, asks the content cache whether anything changed, uploads a
//! [`SnapshotDocument`] through the transport, and feeds the outcome back
//! into the scheduler and the status publisher.
//!
//! All methods are blocking. The [`Coordinator`](crate::Coordinator) runs
//! them on tokio's blocking pool; tests call them directly.

use crate::cache::{CacheEntry, CacheStats, ContentCache, SyncReason};
use crate::clock::{monotonic_now, SystemTimeSource, TimeSource};
use crate::config::{ModuleOptions, SyncConfig, ALL_DATA_MODULE};
use crate::document::SnapshotDocument;
use crate::error::{SyncError, SyncResult};
use crate::hash::{hash_snapshot, ContentHash};
use crate::local_state::LocalState;
use crate::module::{Mutation, Snapshot, Syncable};
use crate::scheduler::{AdaptiveScheduler, SchedulerState, TickInputs};
use crate::status::{ListenerId, StatusPublisher, SyncStatus};
use crate::tracker::MutationTracker;
use crate::transport::{BlobMetadata, RemoteBlobInfo, RemoteTransport};
use chrono::{DateTime, Utc};
use driftsync_storage::KeyValueStore;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Result of a [`SyncService::sync_to_remote`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A snapshot was uploaded.
    Uploaded {
        /// Hash of the uploaded snapshot.
        content_hash: ContentHash,
        /// Why the cache asked for the upload.
        reason: SyncReason,
        /// Size of the uploaded document.
        bytes: usize,
        /// Whether the payload was gzip-compressed.
        compressed: bool,
        /// Uploaded by [`SyncService::force_sync_now`] despite the cache.
        forced: bool,
    },
    /// Nothing to upload.
    Skipped {
        /// Why the cache declined.
        reason: SyncReason,
    },
    /// Another sync is in flight; this call did nothing.
    AlreadyInProgress,
    /// Offline or unauthenticated; this call did nothing.
    NotReady,
}

impl SyncOutcome {
    /// True if a snapshot was uploaded.
    pub fn is_uploaded(&self) -> bool {
        matches!(self, SyncOutcome::Uploaded { .. })
    }
}

/// Result of an import attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    /// The remote snapshot replaced local state.
    Imported {
        /// Modification time of the imported blob.
        modified_at: DateTime<Utc>,
        /// Modules whose state was replaced.
        modules: Vec<String>,
    },
    /// The remote holds no snapshot yet.
    NoRemoteData,
    /// The remote snapshot is not newer than the local state.
    UpToDate {
        /// Modification time of the newest remote blob.
        remote: DateTime<Utc>,
        /// Local last-sync marker.
        local: DateTime<Utc>,
    },
    /// Another sync or import is in flight.
    AlreadyInProgress,
}

/// A downloaded and validated remote snapshot.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
    /// Listing entry of the blob.
    pub info: RemoteBlobInfo,
    /// The parsed document.
    pub document: SnapshotDocument,
    /// The restored snapshot.
    pub snapshot: Snapshot,
}

/// Counters describing the service's sync history.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Sync attempts that reached the cache decision.
    pub attempts: u64,
    /// Successful uploads.
    pub uploads: u64,
    /// Attempts skipped because nothing changed.
    pub skips: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Successful imports.
    pub imports: u64,
    /// Bytes uploaded.
    pub bytes_sent: u64,
    /// Last error message.
    pub last_error: Option<String>,
    /// Time of the last finished attempt.
    pub last_outcome_at: Option<DateTime<Utc>>,
}

struct EngineState {
    cache: ContentCache,
    scheduler: AdaptiveScheduler,
    online: bool,
    authenticated: bool,
    pending: bool,
    last_sync: Option<DateTime<Utc>>,
}

impl EngineState {
    fn inputs(&self) -> TickInputs {
        TickInputs {
            online: self.online,
            authenticated: self.authenticated,
            pending_changes: self.pending,
        }
    }

    fn ready(&self) -> bool {
        self.online && self.authenticated
    }
}

/// Clears the in-flight flag when a sync or import ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl FlightGuard<'_> {
    fn acquire(flag: &AtomicBool) -> Option<FlightGuard<'_>> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The sync engine for one device.
///
/// Constructed once and shared as `Arc<SyncService<T>>`. Registered modules
/// hold only a weak reference back to the service.
pub struct SyncService<T: RemoteTransport> {
    me: Weak<Self>,
    config: SyncConfig,
    transport: T,
    local: LocalState,
    clock: Arc<dyn TimeSource>,
    modules: RwLock<Vec<Arc<dyn Syncable>>>,
    tracker: MutationTracker,
    state: Mutex<EngineState>,
    syncing: AtomicBool,
    generation: AtomicU64,
    publisher: StatusPublisher,
    stats: RwLock<SyncStats>,
    wake: Notify,
    coordinated: AtomicBool,
}

impl<T: RemoteTransport + 'static> SyncService<T> {
    /// Creates a service using the system clock.
    pub fn new(config: SyncConfig, transport: T, store: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Self::with_time_source(config, transport, store, Arc::new(SystemTimeSource))
    }

    /// Creates a service with an explicit wall-clock source.
    ///
    /// The persisted cache and last-sync marker are loaded from `store`;
    /// unreadable values are discarded.
    pub fn with_time_source(
        config: SyncConfig,
        transport: T,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<Self> {
        let local = LocalState::new(store);
        let now = clock.now();
        let cache = match local.load_cache() {
            Some(persisted) => ContentCache::from_persisted(config.cache.clone(), persisted, now),
            None => ContentCache::new(config.cache.clone()),
        };
        let state = EngineState {
            cache,
            scheduler: AdaptiveScheduler::new(config.scheduler.clone(), monotonic_now()),
            online: false,
            authenticated: false,
            pending: false,
            last_sync: local.last_sync(),
        };

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            transport,
            local,
            clock,
            modules: RwLock::new(Vec::new()),
            tracker: MutationTracker::new(),
            state: Mutex::new(state),
            syncing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            publisher: StatusPublisher::new(),
            stats: RwLock::new(SyncStats::default()),
            wake: Notify::new(),
            coordinated: AtomicBool::new(false),
        })
    }

    /// Registers a module and starts observing its writes.
    ///
    /// A module registered under an existing name replaces the old one.
    pub fn register(&self, module: Arc<dyn Syncable>, options: ModuleOptions) {
        let name = module.name().to_string();
        let debounce = options.debounce.unwrap_or(self.config.default_debounce);
        self.tracker
            .register(&name, debounce, options.excluded_fields, &module.snapshot());

        let service = self.me.clone();
        let target = Arc::downgrade(&module);
        module.on_mutate(Arc::new(move |mutation: &Mutation| {
            if let Some(service) = service.upgrade() {
                service.on_mutation(mutation, &target);
            }
        }));

        let mut modules = self.modules.write();
        if let Some(existing) = modules.iter_mut().find(|m| m.name() == name) {
            warn!(module = %name, "module registered twice, replacing");
            *existing = module;
        } else {
            modules.push(module);
        }
        debug!(module = %name, debounce_ms = debounce.as_millis() as u64, "registered module");
    }

    /// Names of the registered modules, in registration order.
    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Collects the full snapshot: one key per registered module.
    pub fn collect_snapshot(&self) -> Snapshot {
        let modules = self.modules.read().clone();
        let map: Map<String, Value> = modules
            .iter()
            .map(|m| (m.name().to_string(), m.snapshot()))
            .collect();
        Value::Object(map)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the persisted local state.
    pub fn local_state(&self) -> &LocalState {
        &self.local
    }

    /// Current status.
    pub fn status(&self) -> SyncStatus {
        let state = self.state.lock();
        SyncStatus {
            is_online: state.online,
            is_authenticated: state.authenticated,
            is_syncing: self.syncing.load(Ordering::SeqCst),
            has_pending_changes: state.pending,
            last_sync: state.last_sync,
        }
    }

    /// Subscribes to status changes.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.publisher.subscribe(listener)
    }

    /// Removes a status subscription.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.publisher.unsubscribe(id)
    }

    /// Publishes the current status to all subscribers.
    pub fn publish_status(&self) {
        let status = self.status();
        self.publisher.publish(&status);
    }

    /// True if local changes have not been synced yet.
    pub fn has_pending_changes(&self) -> bool {
        self.state.lock().pending
    }

    /// Sync counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.state.lock().cache.stats().clone()
    }

    /// The cache entry for the full snapshot.
    pub fn cache_entry(&self) -> Option<CacheEntry> {
        self.state.lock().cache.entry(ALL_DATA_MODULE).cloned()
    }

    /// Scheduler state.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.state.lock().scheduler.state().clone()
    }

    /// Last successful upload or import.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_sync
    }

    /// Updates network reachability.
    ///
    /// Coming online with pending changes schedules an immediate tick.
    pub fn set_online(&self, online: bool) {
        self.update_readiness(|state| state.online = online);
    }

    /// Updates the authentication state.
    ///
    /// Becoming authenticated with pending changes schedules an immediate
    /// tick.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.update_readiness(|state| state.authenticated = authenticated);
    }

    /// Records a user-activity event (rate-limited).
    pub fn record_activity(&self) {
        let rearmed = {
            let mut state = self.state.lock();
            let pending = state.pending;
            state.scheduler.record_activity(pending, monotonic_now())
        };
        if rearmed {
            self.wake.notify_one();
        }
    }

    /// Clears the content cache in memory and in storage, so the next sync
    /// uploads unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted copy cannot be removed.
    pub fn clear_cache(&self) -> SyncResult<()> {
        self.state.lock().cache.clear();
        self.local.clear_cache()?;
        info!("cleared sync cache");
        Ok(())
    }

    /// Uploads the full snapshot if the cache says it changed or is due for
    /// a periodic backup.
    ///
    /// Returns immediately with [`SyncOutcome::AlreadyInProgress`] if a sync
    /// is in flight. On failure, pending changes are kept and the scheduler
    /// backs off.
    pub fn sync_to_remote(&self) -> SyncResult<SyncOutcome> {
        self.sync_inner(false)
    }

    /// Uploads the full snapshot now, even if the cache reports it
    /// unchanged.
    pub fn force_sync_now(&self) -> SyncResult<SyncOutcome> {
        self.sync_inner(true)
    }

    /// Downloads the most recently modified remote snapshot.
    ///
    /// Returns `None` if the remote holds no snapshot. Local state is not
    /// touched.
    ///
    /// # Errors
    ///
    /// Transport errors, [`SyncError::Compression`] for undecodable payloads
    /// and [`SyncError::ImportValidation`] for malformed documents.
    pub fn load_from_remote(&self) -> SyncResult<Option<RemoteSnapshot>> {
        if !self.state.lock().ready() {
            return Err(SyncError::NotReady);
        }
        match self.newest_remote()? {
            Some(info) => self.fetch(info).map(Some),
            None => Ok(None),
        }
    }

    /// Startup import: imports the remote snapshot if this device has never
    /// synced, or if the remote is newer than the local marker by more than
    /// the import tolerance.
    pub fn import_on_startup(&self) -> SyncResult<ImportOutcome> {
        self.refresh_from_remote(false)
    }

    /// Imports the remote snapshot. With `force`, the newer-than check is
    /// skipped.
    ///
    /// # Errors
    ///
    /// [`SyncError::NotReady`] when offline or unauthenticated. Validation
    /// and decode failures leave local state untouched.
    pub fn refresh_from_remote(&self, force: bool) -> SyncResult<ImportOutcome> {
        let Some(flight) = FlightGuard::acquire(&self.syncing) else {
            debug!("import skipped, sync already in progress");
            return Ok(ImportOutcome::AlreadyInProgress);
        };
        if !self.state.lock().ready() {
            return Err(SyncError::NotReady);
        }
        self.publish_status();

        let result = self.import_inner(force);
        if let Err(e) = &result {
            warn!(error = %e, "import failed");
            self.stats.write().last_error = Some(e.to_string());
        }

        drop(flight);
        self.publish_status();
        result
    }

    /// Earliest instant the coordinator needs to wake up at.
    ///
    /// While a debounce window is open, ticks are held back until it closes.
    pub fn next_wake(&self) -> Instant {
        match self.tracker.next_deadline() {
            Some(deadline) => deadline,
            None => self.state.lock().scheduler.next_tick(),
        }
    }

    /// Advances timers to `now`.
    ///
    /// Elapsed debounce windows mark pending changes and pull the next tick
    /// forward to `now`. A due tick is held back while any debounce window
    /// is still open. Returns true if a tick fired and its inputs call for
    /// a sync.
    pub fn poll_timers(&self, now: Instant) -> bool {
        let due = self.tracker.take_due(now);
        let settling = self.tracker.next_deadline().is_some();
        let wall = self.clock.now();

        let (should_sync, pending_flipped, expired) = {
            let mut state = self.state.lock();
            let mut flipped = false;
            if !due.is_empty() {
                debug!(modules = ?due, "debounce elapsed");
                flipped = !state.pending;
                state.pending = true;
                state.scheduler.tick_at(now);
            }

            if settling || now < state.scheduler.next_tick() {
                (false, flipped, 0)
            } else {
                state.scheduler.on_tick(now);
                let expired = state.cache.sweep_expired(wall);
                (state.inputs().should_sync(), flipped, expired)
            }
        };

        if expired > 0 {
            self.persist_cache();
        }
        if pending_flipped {
            self.publish_status();
        }
        should_sync
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    /// Marks the service as driven by a coordinator. Returns false if one
    /// already is.
    pub(crate) fn claim_coordinator(&self) -> bool {
        self.coordinated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_coordinator(&self) {
        self.coordinated.store(false, Ordering::SeqCst);
    }

    fn on_mutation(&self, mutation: &Mutation, module: &Weak<dyn Syncable>) {
        let outcome = self.tracker.record(
            mutation,
            || module.upgrade().map(|m| m.snapshot()).unwrap_or(Value::Null),
            monotonic_now(),
            self.clock.now(),
        );
        if !outcome.is_armed() {
            debug!(module = %mutation.module, ?outcome, "mutation not tracked");
            return;
        }

        let flipped = {
            let mut state = self.state.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            let flipped = !state.pending;
            state.pending = true;
            flipped
        };
        if flipped {
            self.publish_status();
        }
        self.wake.notify_one();
    }

    fn update_readiness(&self, apply: impl FnOnce(&mut EngineState)) {
        let changed = {
            let mut state = self.state.lock();
            let was_ready = state.ready();
            let before = (state.online, state.authenticated);
            apply(&mut state);
            if !was_ready && state.ready() && state.pending {
                debug!("became ready with pending changes");
                state.scheduler.tick_at(monotonic_now());
            }
            before != (state.online, state.authenticated)
        };
        if changed {
            self.publish_status();
            self.wake.notify_one();
        }
    }

    fn sync_inner(&self, force: bool) -> SyncResult<SyncOutcome> {
        let Some(flight) = FlightGuard::acquire(&self.syncing) else {
            debug!("sync already in progress");
            return Ok(SyncOutcome::AlreadyInProgress);
        };
        if !self.state.lock().ready() {
            debug!("sync skipped, not online and authenticated");
            return Ok(SyncOutcome::NotReady);
        }
        self.publish_status();

        let result = self.upload(force);
        let wall = self.clock.now();
        {
            let mut state = self.state.lock();
            let now = monotonic_now();
            match &result {
                Ok(_) => {
                    let pending = state.pending;
                    state.scheduler.record_success(pending, now);
                }
                Err(_) => {
                    state.pending = true;
                    state.scheduler.record_failure(true, now);
                }
            }
        }
        {
            let mut stats = self.stats.write();
            stats.last_outcome_at = Some(wall);
            match &result {
                Ok(SyncOutcome::Uploaded { bytes, .. }) => {
                    stats.uploads += 1;
                    stats.bytes_sent += *bytes as u64;
                    stats.last_error = None;
                }
                Ok(_) => stats.skips += 1,
                Err(e) => {
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                }
            }
        }
        if let Err(e) = &result {
            warn!(error = %e, retryable = e.is_retryable(), "sync failed");
        }

        drop(flight);
        self.publish_status();
        self.wake.notify_one();
        result
    }

    fn upload(&self, force: bool) -> SyncResult<SyncOutcome> {
        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot = self.collect_snapshot();
        let now = self.clock.now();
        self.stats.write().attempts += 1;

        let decision = self
            .state
            .lock()
            .cache
            .should_sync(ALL_DATA_MODULE, &snapshot, now);
        if !decision.should_sync && !force {
            debug!(reason = %decision.reason, "sync skipped");
            self.persist_cache();
            self.clear_pending(generation);
            return Ok(SyncOutcome::Skipped {
                reason: decision.reason,
            });
        }

        let hashed = match decision.hashed {
            Some(hashed) => hashed,
            None => hash_snapshot(&snapshot, self.config.cache.hash_algorithm)?,
        };
        let device_id = self.local.device_id()?.to_string();
        let document = SnapshotDocument::build(
            &hashed,
            device_id.clone(),
            self.config.app_version.clone(),
            now,
            &self.config.compression,
        );
        let body = document.to_bytes()?;
        let metadata = BlobMetadata {
            name: self.config.remote_name.clone(),
            device_id,
            content_hash: hashed.hash.to_string(),
            modified_at: now,
        };

        let info = self.transport.put_blob(&metadata, &body)?;

        let evicted = {
            let mut state = self.state.lock();
            state.last_sync = Some(now);
            state.cache.update(ALL_DATA_MODULE, &hashed, now)
        };
        if !evicted.is_empty() {
            debug!(?evicted, "cache entries evicted");
        }
        if let Err(e) = self.local.set_last_sync(now) {
            warn!(error = %e, "failed to persist last-sync marker");
        }
        self.persist_cache();
        self.clear_pending(generation);

        info!(
            blob = %info.id,
            bytes = body.len(),
            compressed = document.envelope.compressed,
            reason = %decision.reason,
            "uploaded snapshot"
        );
        Ok(SyncOutcome::Uploaded {
            content_hash: hashed.hash,
            reason: decision.reason,
            bytes: body.len(),
            compressed: document.envelope.compressed,
            forced: force && !decision.should_sync,
        })
    }

    fn import_inner(&self, force: bool) -> SyncResult<ImportOutcome> {
        let before = self.collect_snapshot();
        let (generation, pending_before) = {
            let state = self.state.lock();
            (self.generation.load(Ordering::SeqCst), state.pending)
        };
        let Some(info) = self.newest_remote()? else {
            debug!("no remote snapshot to import");
            return Ok(ImportOutcome::NoRemoteData);
        };

        if !force {
            if let Some(local) = self.local.last_sync() {
                let tolerance = chrono::Duration::from_std(self.config.import_tolerance)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                if info.modified_at <= local + tolerance {
                    debug!(remote = %info.modified_at, local = %local, "remote not newer");
                    return Ok(ImportOutcome::UpToDate {
                        remote: info.modified_at,
                        local,
                    });
                }
            }
        }

        let remote = self.fetch(info)?;
        let updates = self.validate(&remote.snapshot)?;
        let applied = self.apply(&updates)?;

        let now = self.clock.now();
        let modified_at = remote.info.modified_at;
        let hashed = hash_snapshot(
            &imported_snapshot(before, &updates),
            self.config.cache.hash_algorithm,
        );
        {
            let mut state = self.state.lock();
            state.last_sync = Some(modified_at);
            if pending_before || self.generation.load(Ordering::SeqCst) != generation {
                // Local edits the remote lacks; they stay pending and the
                // next sync must upload.
                debug!("unsynced local changes, not priming cache after import");
                state.cache.remove(ALL_DATA_MODULE);
            } else {
                match &hashed {
                    Ok(hashed) => {
                        state.cache.update(ALL_DATA_MODULE, hashed, now);
                    }
                    Err(e) => warn!(error = %e, "could not prime cache after import"),
                }
                state.pending = false;
            }
        }
        if let Err(e) = self.local.set_last_sync(modified_at) {
            warn!(error = %e, "failed to persist last-sync marker");
        }
        self.persist_cache();
        self.stats.write().imports += 1;

        info!(
            blob = %remote.info.id,
            from_device = %remote.document.device_id,
            modules = applied.len(),
            "imported remote snapshot"
        );
        Ok(ImportOutcome::Imported {
            modified_at,
            modules: applied,
        })
    }

    fn newest_remote(&self) -> SyncResult<Option<RemoteBlobInfo>> {
        let blobs = self.transport.list_blobs()?;
        Ok(blobs
            .into_iter()
            .filter(|b| b.name == self.config.remote_name)
            .max_by(|a, b| a.modified_at.cmp(&b.modified_at)))
    }

    fn fetch(&self, info: RemoteBlobInfo) -> SyncResult<RemoteSnapshot> {
        let bytes = self.transport.get_blob(&info.id)?;
        let document = SnapshotDocument::from_bytes(&bytes)?;
        let snapshot = document.decode()?;
        Ok(RemoteSnapshot {
            info,
            document,
            snapshot,
        })
    }

    /// Pairs each registered module with its state in `snapshot`.
    fn validate(&self, snapshot: &Snapshot) -> SyncResult<Vec<(Arc<dyn Syncable>, Value)>> {
        let Value::Object(map) = snapshot else {
            return Err(SyncError::ImportValidation(
                "snapshot is not an object".into(),
            ));
        };
        let updates: Vec<_> = self
            .modules
            .read()
            .iter()
            .filter_map(|m| map.get(m.name()).map(|v| (Arc::clone(m), v.clone())))
            .collect();
        if updates.is_empty() {
            return Err(SyncError::ImportValidation(
                "snapshot contains no registered module".into(),
            ));
        }
        Ok(updates)
    }

    fn apply(&self, updates: &[(Arc<dyn Syncable>, Value)]) -> SyncResult<Vec<String>> {
        let mut applied = Vec::with_capacity(updates.len());
        for (module, state) in updates {
            let _importing = self.tracker.begin_import(module.name());
            module
                .apply_without_sync(state.clone())
                .map_err(|e| SyncError::Apply {
                    module: module.name().to_string(),
                    message: e.to_string(),
                })?;
            applied.push(module.name().to_string());
        }
        for (module, _) in updates {
            self.tracker.refresh(module.name(), &module.snapshot());
        }
        Ok(applied)
    }

    fn clear_pending(&self, generation: u64) {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            state.pending = false;
        } else {
            debug!("changes arrived during sync, keeping them pending");
        }
    }

    fn persist_cache(&self) {
        let persisted = self.state.lock().cache.to_persisted();
        if let Err(e) = self.local.save_cache(&persisted) {
            warn!(error = %e, "failed to persist sync cache");
        }
    }
}

impl<T: RemoteTransport> std::fmt::Debug for SyncService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("remote_name", &self.config.remote_name)
            .field("modules", &self.modules.read().len())
            .field("syncing", &self.syncing.load(Ordering::SeqCst))
            .finish()
    }
}

/// What the remote holds after an import: the applied remote state for
/// imported modules, the pre-import state for the rest.
fn imported_snapshot(mut before: Snapshot, updates: &[(Arc<dyn Syncable>, Value)]) -> Snapshot {
    if let Value::Object(map) = &mut before {
        for (module, state) in updates {
            map.insert(module.name().to_string(), state.clone());
        }
    }
    before
}
