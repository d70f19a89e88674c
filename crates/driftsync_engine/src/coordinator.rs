//! The single coordination task.
//!
//! One tokio task owns the recurring timer. It sleeps until the earlier of
//! the scheduler's next tick and the earliest debounce deadline, wakes early
//! whenever the service reports a state change, and runs syncs on the
//! blocking pool so transport I/O never stalls the runtime.

use crate::clock::monotonic_now;
use crate::error::{SyncError, SyncResult};
use crate::service::{ImportOutcome, SyncOutcome, SyncService};
use crate::transport::RemoteTransport;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

enum CoordinatorRequest {
    SyncNow {
        reply: oneshot::Sender<SyncResult<SyncOutcome>>,
    },
    Refresh {
        force: bool,
        reply: oneshot::Sender<SyncResult<ImportOutcome>>,
    },
    Shutdown,
}

/// Handle to a running coordinator.
///
/// Dropping the handle stops the task once it next wakes up.
#[derive(Debug)]
pub struct CoordinatorHandle {
    requests: mpsc::UnboundedSender<CoordinatorRequest>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for CoordinatorRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorRequest::SyncNow { .. } => f.write_str("SyncNow"),
            CoordinatorRequest::Refresh { force, .. } => write!(f, "Refresh({force})"),
            CoordinatorRequest::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl CoordinatorHandle {
    /// Runs [`SyncService::force_sync_now`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoordinatorStopped`] if the task has exited.
    pub async fn force_sync_now(&self) -> SyncResult<SyncOutcome> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(CoordinatorRequest::SyncNow { reply })
            .map_err(|_| SyncError::CoordinatorStopped)?;
        rx.await.map_err(|_| SyncError::CoordinatorStopped)?
    }

    /// Runs [`SyncService::refresh_from_remote`] on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoordinatorStopped`] if the task has exited.
    pub async fn refresh_from_remote(&self, force: bool) -> SyncResult<ImportOutcome> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(CoordinatorRequest::Refresh { force, reply })
            .map_err(|_| SyncError::CoordinatorStopped)?;
        rx.await.map_err(|_| SyncError::CoordinatorStopped)?
    }

    /// True while the task is running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the task and waits for it. An in-flight sync is not cancelled;
    /// it finishes on the blocking pool.
    pub async fn shutdown(self) {
        let _ = self.requests.send(CoordinatorRequest::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "sync coordinator panicked");
        }
    }
}

/// Drives a [`SyncService`] from timers and events.
pub struct Coordinator<T: RemoteTransport + 'static> {
    service: Arc<SyncService<T>>,
    requests: mpsc::UnboundedReceiver<CoordinatorRequest>,
    in_flight: Option<JoinHandle<SyncResult<SyncOutcome>>>,
}

impl<T: RemoteTransport + 'static> Coordinator<T> {
    /// Spawns the coordination task on the current runtime.
    ///
    /// Call [`SyncService::import_on_startup`] first if the device should
    /// pull remote data before it starts uploading.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CoordinatorAlreadyRunning`] if the service is
    /// already driven by another coordinator.
    pub fn spawn(service: Arc<SyncService<T>>) -> SyncResult<CoordinatorHandle> {
        if !service.claim_coordinator() {
            return Err(SyncError::CoordinatorAlreadyRunning);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            service,
            requests: rx,
            in_flight: None,
        };
        let task = tokio::spawn(coordinator.run());
        Ok(CoordinatorHandle { requests: tx, task })
    }

    async fn run(mut self) {
        info!("sync coordinator started");
        loop {
            let wake_at = tokio::time::Instant::from_std(self.service.next_wake());
            let service = Arc::clone(&self.service);

            tokio::select! {
                request = self.requests.recv() => {
                    match request {
                        Some(CoordinatorRequest::Shutdown) | None => break,
                        Some(request) => self.handle_request(request),
                    }
                }
                _ = service.wake().notified() => {}
                _ = tokio::time::sleep_until(wake_at) => self.on_timer(),
                finished = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.in_flight = None;
                    log_finished(finished);
                }
            }
        }

        self.service.release_coordinator();
        info!("sync coordinator stopped");
    }

    fn on_timer(&mut self) {
        if !self.service.poll_timers(monotonic_now()) {
            return;
        }
        if self.in_flight.is_some() {
            debug!("tick skipped, sync already running");
            return;
        }
        let service = Arc::clone(&self.service);
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            service.sync_to_remote()
        }));
    }

    fn handle_request(&mut self, request: CoordinatorRequest) {
        let service = Arc::clone(&self.service);
        match request {
            CoordinatorRequest::SyncNow { reply } => {
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || service.force_sync_now())
                        .await
                        .unwrap_or_else(|e| Err(SyncError::Persistence(format!("sync task failed: {e}"))));
                    let _ = reply.send(result);
                });
            }
            CoordinatorRequest::Refresh { force, reply } => {
                tokio::spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || service.refresh_from_remote(force))
                            .await
                            .unwrap_or_else(|e| {
                                Err(SyncError::Persistence(format!("import task failed: {e}")))
                            });
                    let _ = reply.send(result);
                });
            }
            CoordinatorRequest::Shutdown => {}
        }
    }
}

impl<T: RemoteTransport + 'static> Drop for Coordinator<T> {
    fn drop(&mut self) {
        // Covers a panic inside the loop; a normal exit already released.
        self.service.release_coordinator();
    }
}

async fn join_in_flight<R>(task: &mut Option<JoinHandle<R>>) -> Result<R, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn log_finished(finished: Result<SyncResult<SyncOutcome>, JoinError>) {
    match finished {
        Ok(Ok(outcome)) => debug!(?outcome, "scheduled sync finished"),
        Ok(Err(e)) => debug!(error = %e, "scheduled sync failed"),
        Err(e) => warn!(error = %e, "sync task panicked"),
    }
}
