//! Transport layer abstraction for remote snapshot storage.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// A blob as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBlobInfo {
    /// Remote identifier used for downloads.
    pub id: String,
    /// Blob name.
    pub name: String,
    /// Last modification time reported by the remote.
    pub modified_at: DateTime<Utc>,
    /// Size in bytes.
    pub size: u64,
}

/// Metadata sent alongside an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    /// Blob name; an upload replaces the blob with the same name.
    pub name: String,
    /// Uploading device.
    pub device_id: String,
    /// Content hash of the snapshot inside the blob.
    pub content_hash: String,
    /// Time the snapshot was taken.
    pub modified_at: DateTime<Utc>,
}

/// Remote storage for snapshot blobs.
///
/// Implementations are blocking; the coordinator calls them off the async
/// runtime. Errors should use [`SyncError::Transport`] so the scheduler can
/// back off.
pub trait RemoteTransport: Send + Sync {
    /// Creates or replaces a blob.
    fn put_blob(&self, metadata: &BlobMetadata, payload: &[u8]) -> SyncResult<RemoteBlobInfo>;

    /// Lists available blobs with their modification times.
    fn list_blobs(&self) -> SyncResult<Vec<RemoteBlobInfo>>;

    /// Downloads a blob.
    fn get_blob(&self, id: &str) -> SyncResult<Vec<u8>>;
}

impl<T: RemoteTransport + ?Sized> RemoteTransport for Arc<T> {
    fn put_blob(&self, metadata: &BlobMetadata, payload: &[u8]) -> SyncResult<RemoteBlobInfo> {
        (**self).put_blob(metadata, payload)
    }

    fn list_blobs(&self) -> SyncResult<Vec<RemoteBlobInfo>> {
        (**self).list_blobs()
    }

    fn get_blob(&self, id: &str) -> SyncResult<Vec<u8>> {
        (**self).get_blob(id)
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    info: RemoteBlobInfo,
    data: Vec<u8>,
}

/// An in-memory transport for tests and local tooling.
#[derive(Debug)]
pub struct MemoryTransport {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    connected: AtomicBool,
    fail_puts: AtomicUsize,
    next_id: AtomicU64,
    puts: AtomicUsize,
    lists: AtomicUsize,
    gets: AtomicUsize,
    put_gate: Mutex<Option<Arc<PutGate>>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Creates an empty, connected transport.
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            connected: AtomicBool::new(true),
            fail_puts: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            puts: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            put_gate: Mutex::new(None),
        }
    }

    /// Sets the connected state; a disconnected transport fails every call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes the next `count` uploads fail with a retryable error.
    pub fn fail_next_puts(&self, count: usize) {
        self.fail_puts.store(count, Ordering::SeqCst);
    }

    /// Blocks uploads on `gate` until it is released.
    pub fn set_put_gate(&self, gate: Option<Arc<PutGate>>) {
        *self.put_gate.lock() = gate;
    }

    /// Seeds a blob as if another device had created it. Always adds a new
    /// blob, even if one with the same name exists. Returns its id.
    pub fn insert_blob(
        &self,
        name: impl Into<String>,
        data: Vec<u8>,
        modified_at: DateTime<Utc>,
    ) -> String {
        self.store(name.into(), data, modified_at, false).id
    }

    /// Number of `put_blob` calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `list_blobs` calls.
    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Number of `get_blob` calls.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Total number of calls of any kind.
    pub fn call_count(&self) -> usize {
        self.put_count() + self.list_count() + self.get_count()
    }

    /// Contents of the blob with `name`.
    pub fn blob_by_name(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .values()
            .find(|b| b.info.name == name)
            .map(|b| b.data.clone())
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }

    fn store(
        &self,
        name: String,
        data: Vec<u8>,
        modified_at: DateTime<Utc>,
        replace: bool,
    ) -> RemoteBlobInfo {
        let mut blobs = self.blobs.lock();
        let existing = if replace {
            blobs
                .values()
                .find(|b| b.info.name == name)
                .map(|b| b.info.id.clone())
        } else {
            None
        };
        let id = existing
            .unwrap_or_else(|| format!("blob-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        let info = RemoteBlobInfo {
            id: id.clone(),
            name,
            modified_at,
            size: data.len() as u64,
        };
        blobs.insert(
            id,
            StoredBlob {
                info: info.clone(),
                data,
            },
        );
        info
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("not connected"))
        }
    }
}

impl RemoteTransport for MemoryTransport {
    fn put_blob(&self, metadata: &BlobMetadata, payload: &[u8]) -> SyncResult<RemoteBlobInfo> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        let gate = self.put_gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass();
        }

        self.check_connected()?;
        let failed = self
            .fail_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SyncError::transport_retryable("injected upload failure"));
        }

        Ok(self.store(
            metadata.name.clone(),
            payload.to_vec(),
            metadata.modified_at,
            true,
        ))
    }

    fn list_blobs(&self) -> SyncResult<Vec<RemoteBlobInfo>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        Ok(self.blobs.lock().values().map(|b| b.info.clone()).collect())
    }

    fn get_blob(&self, id: &str) -> SyncResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_connected()?;
        self.blobs
            .lock()
            .get(id)
            .map(|b| b.data.clone())
            .ok_or_else(|| SyncError::transport_fatal(format!("blob {id} not found")))
    }
}

/// Holds uploads inside [`MemoryTransport::put_blob`] until released.
#[derive(Debug)]
pub struct PutGate {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// The test side of a [`PutGate`].
#[derive(Debug)]
pub struct PutGateControl {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl PutGate {
    /// Creates a gate and its control.
    pub fn new() -> (Arc<Self>, PutGateControl) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Arc::new(Self {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
            }),
            PutGateControl {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    fn pass(&self) {
        // A dropped control means nobody is holding the gate.
        let _ = self.entered.lock().send(());
        let _ = self.release.lock().recv();
    }
}

impl PutGateControl {
    /// Waits until an upload reaches the gate.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        self.entered.recv_timeout(timeout).is_ok()
    }

    /// Lets one upload through.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}
