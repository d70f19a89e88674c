//! # driftsync Engine
//!
//! Client-side snapshot sync engine.
//!
//! This crate provides:
//! - Debounced mutation tracking across independent state containers
//! - Content-addressable change detection (SHA-256 over canonical JSON)
//! - An adaptive sync interval with bounded exponential backoff
//! - A single-flight orchestrator that uploads and imports whole snapshots
//! - A tokio coordination task driving it all from one timer
//! - Status fan-out to UI observers
//!
//! ## Architecture
//!
//! Every registered [`Syncable`] reports its writes. The [`MutationTracker`]
//! collapses bursts into one notification per debounce window, which marks
//! pending changes and pulls the next scheduler tick forward. On a tick the
//! [`SyncService`] snapshots all modules, asks the [`ContentCache`] whether
//! the content changed, and only then compresses and uploads it through a
//! [`RemoteTransport`].
//!
//! ## Key Invariants
//!
//! - At most one sync or import is in flight per service
//! - Identical snapshots hash identically regardless of key order
//! - Imports never trigger uploads of the data they just applied
//! - The cache is updated after a successful upload, before status is
//!   republished
//! - Newer whole snapshot replaces older whole snapshot; there is no merge

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod coordinator;
mod document;
mod error;
mod hash;
mod http;
mod local_state;
mod module;
mod scheduler;
mod service;
mod status;
mod tracker;
mod transport;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use cache::{CacheEntry, CacheStats, ContentCache, PersistedCache, SyncDecision, SyncReason};
pub use clock::{monotonic_now, FakeTimeSource, SystemTimeSource, TimeSource};
pub use config::{
    CacheConfig, HashAlgorithm, ModuleOptions, SchedulerConfig, SyncConfig, ALL_DATA_MODULE,
};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use document::{SnapshotDocument, FORMAT_VERSION};
pub use error::{SyncError, SyncResult};
pub use hash::{hash_snapshot, ContentHash, HashedSnapshot};
pub use http::{HttpClient, HttpFailure, HttpTransport, DEVICE_HEADER, HASH_HEADER, MODIFIED_HEADER};
pub use local_state::{LocalState, CACHE_SNAPSHOT_KEY, DEVICE_ID_KEY, LAST_SYNC_KEY};
pub use module::{MemoryModule, Mutation, MutationHook, MutationOrigin, Snapshot, Syncable};
pub use scheduler::{AdaptiveScheduler, SchedulerState, TickInputs};
pub use service::{ImportOutcome, RemoteSnapshot, SyncOutcome, SyncService, SyncStats};
pub use status::{ListenerId, StatusListener, StatusPublisher, SyncStatus};
pub use tracker::{ImportGuard, MutationTracker, TrackOutcome};
pub use transport::{
    BlobMetadata, MemoryTransport, PutGate, PutGateControl, RemoteBlobInfo, RemoteTransport,
};
