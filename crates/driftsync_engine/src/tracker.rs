//! Debounced mutation tracking across independent state containers.

use crate::config::HashAlgorithm;
use crate::hash::{hash_snapshot, ContentHash};
use crate::module::{Mutation, MutationOrigin, Snapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// What the tracker did with a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The debounce timer was (re)armed to fire at this instant.
    Armed(Instant),
    /// Raised by the module's own import on the importing thread.
    IgnoredImport,
    /// Flagged as an internal write.
    IgnoredInternal,
    /// Only excluded fields changed.
    IgnoredExcluded,
    /// The module is not registered.
    UnknownModule,
}

impl TrackOutcome {
    /// True if the mutation armed the debounce timer.
    pub fn is_armed(&self) -> bool {
        matches!(self, TrackOutcome::Armed(_))
    }
}

#[derive(Debug)]
struct TrackedModule {
    debounce: Duration,
    excluded_fields: Vec<String>,
    fingerprint: Option<ContentHash>,
    last_modified: Option<DateTime<Utc>>,
    deadline: Option<Instant>,
}

/// Observes container writes and turns bursts into single notifications.
///
/// Every tracked write records the module's last-modified time and pushes
/// its debounce deadline out by the module's window. [`take_due`] hands out
/// each module at most once per quiet period: the tracker is edge-triggered,
/// not count-triggered.
///
/// Import suppression is scoped to one module and the thread applying the
/// import into it. Writes from any other thread still count, even while
/// that module is being replaced.
///
/// [`take_due`]: MutationTracker::take_due
#[derive(Debug, Default)]
pub struct MutationTracker {
    modules: Mutex<HashMap<String, TrackedModule>>,
    importing: Mutex<HashMap<String, ThreadId>>,
}

impl MutationTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a module.
    ///
    /// With `excluded_fields`, the current state is fingerprinted so later
    /// writes that only touch those fields can be recognized.
    pub fn register(
        &self,
        name: &str,
        debounce: Duration,
        excluded_fields: Vec<String>,
        current: &Snapshot,
    ) {
        let fingerprint = if excluded_fields.is_empty() {
            None
        } else {
            fingerprint(current, &excluded_fields)
        };
        self.modules.lock().insert(
            name.to_string(),
            TrackedModule {
                debounce,
                excluded_fields,
                fingerprint,
                last_modified: None,
                deadline: None,
            },
        );
    }

    /// Records a write.
    ///
    /// `snapshot` is only called for modules with excluded fields.
    pub fn record(
        &self,
        mutation: &Mutation,
        snapshot: impl FnOnce() -> Snapshot,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> TrackOutcome {
        if self.is_import_write(&mutation.module) {
            return TrackOutcome::IgnoredImport;
        }
        if mutation.origin == MutationOrigin::Internal {
            return TrackOutcome::IgnoredInternal;
        }

        let mut modules = self.modules.lock();
        let Some(module) = modules.get_mut(&mutation.module) else {
            return TrackOutcome::UnknownModule;
        };

        if !module.excluded_fields.is_empty() {
            let next = fingerprint(&snapshot(), &module.excluded_fields);
            if next.is_some() && next == module.fingerprint {
                return TrackOutcome::IgnoredExcluded;
            }
            module.fingerprint = next;
        }

        let deadline = now + module.debounce;
        module.last_modified = Some(wall);
        module.deadline = Some(deadline);
        TrackOutcome::Armed(deadline)
    }

    /// Earliest armed debounce deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.modules
            .lock()
            .values()
            .filter_map(|m| m.deadline)
            .min()
    }

    /// Disarms and returns the modules whose debounce window has elapsed.
    pub fn take_due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .modules
            .lock()
            .iter_mut()
            .filter_map(|(name, module)| match module.deadline {
                Some(deadline) if deadline <= now => {
                    module.deadline = None;
                    Some(name.clone())
                }
                _ => None,
            })
            .collect();
        due.sort();
        due
    }

    /// Last tracked write to `name`.
    pub fn last_modified(&self, name: &str) -> Option<DateTime<Utc>> {
        self.modules.lock().get(name).and_then(|m| m.last_modified)
    }

    /// True while an import is being applied to `name`.
    pub fn is_importing(&self, name: &str) -> bool {
        self.importing.lock().contains_key(name)
    }

    /// Marks the start of an import into `name` on the current thread.
    ///
    /// Until the guard drops, writes to `name` raised on this thread are
    /// ignored. Modules must therefore report the writes of
    /// `apply_without_sync` synchronously, before it returns.
    pub fn begin_import(&self, name: &str) -> ImportGuard<'_> {
        self.importing
            .lock()
            .insert(name.to_string(), thread::current().id());
        ImportGuard {
            tracker: self,
            module: name.to_string(),
        }
    }

    fn is_import_write(&self, name: &str) -> bool {
        self.importing.lock().get(name) == Some(&thread::current().id())
    }

    /// Re-fingerprints a module after its state was replaced by an import.
    pub fn refresh(&self, name: &str, current: &Snapshot) {
        if let Some(module) = self.modules.lock().get_mut(name) {
            if !module.excluded_fields.is_empty() {
                module.fingerprint = fingerprint(current, &module.excluded_fields);
            }
        }
    }
}

/// Keeps the tracker in import mode while alive.
#[derive(Debug)]
pub struct ImportGuard<'a> {
    tracker: &'a MutationTracker,
    module: String,
}

impl Drop for ImportGuard<'_> {
    fn drop(&mut self) {
        self.tracker.importing.lock().remove(&self.module);
    }
}

fn fingerprint(snapshot: &Snapshot, excluded: &[String]) -> Option<ContentHash> {
    let stripped = match snapshot {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !excluded.iter().any(|e| e == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    // FNV is enough to compare a module against its own previous state.
    hash_snapshot(&stripped, HashAlgorithm::Fnv1a)
        .ok()
        .map(|h| h.hash)
}
