//! Sync status and its observer registry.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Snapshot of the engine's externally visible state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Network reachable.
    pub is_online: bool,
    /// Remote credentials present.
    pub is_authenticated: bool,
    /// A sync is in flight.
    pub is_syncing: bool,
    /// Local changes have not reached the remote yet.
    pub has_pending_changes: bool,
    /// Last successful upload or import.
    pub last_sync: Option<DateTime<Utc>>,
}

/// Callback invoked on every published status.
pub type StatusListener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// Handle returned by [`StatusPublisher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Synchronous fan-out of [`SyncStatus`] to subscribers.
///
/// A panicking listener is logged and skipped; the others still run.
#[derive(Default)]
pub struct StatusPublisher {
    listeners: RwLock<Vec<(ListenerId, StatusListener)>>,
    next_id: AtomicU64,
}

impl StatusPublisher {
    /// Creates a publisher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of subscribers.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers `status` to every subscriber. Returns how many panicked.
    pub fn publish(&self, status: &SyncStatus) -> usize {
        // Listeners may subscribe or unsubscribe from inside the callback.
        let listeners: Vec<_> = self.listeners.read().clone();
        let mut panicked = 0;
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                panicked += 1;
                warn!(listener = id.0, "status listener panicked");
            }
        }
        panicked
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
