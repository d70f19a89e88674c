//! The capability a state container implements to take part in sync.

use crate::error::SyncResult;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The full serializable state of one or more containers.
pub type Snapshot = Value;

/// Where a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOrigin {
    /// A user or application write; schedules a sync.
    User,
    /// A write flagged as internal (cosmetic or derived state); never
    /// schedules a sync.
    Internal,
}

/// Notification that a container's state was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Module name.
    pub module: String,
    /// Where the write came from.
    pub origin: MutationOrigin,
}

impl Mutation {
    /// A user write to `module`.
    pub fn user(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            origin: MutationOrigin::User,
        }
    }

    /// An internal write to `module`.
    pub fn internal(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            origin: MutationOrigin::Internal,
        }
    }
}

/// Callback a container invokes after every write.
pub type MutationHook = Arc<dyn Fn(&Mutation) + Send + Sync>;

/// A state container the engine can snapshot and restore.
///
/// The engine never inspects module-specific shapes; it only reads whole
/// snapshots and, on import, hands back a whole replacement.
pub trait Syncable: Send + Sync {
    /// Stable module name; also the key of the module in the full snapshot.
    fn name(&self) -> &str;

    /// Returns the current state.
    fn snapshot(&self) -> Snapshot;

    /// Replaces the state with an imported one.
    ///
    /// Implementations may route this through their ordinary write path; the
    /// engine suppresses the resulting mutation notifications.
    fn apply_without_sync(&self, state: Snapshot) -> SyncResult<()>;

    /// Registers a hook to call after every write.
    fn on_mutate(&self, hook: MutationHook);
}

/// An in-memory [`Syncable`] holding a JSON document.
///
/// Serves as the decorator around a plain state value: every call to
/// [`MemoryModule::update`] behaves like a normal write and then notifies
/// the registered hooks.
pub struct MemoryModule {
    name: String,
    state: RwLock<Value>,
    hooks: RwLock<Vec<MutationHook>>,
    applied: AtomicU64,
}

impl MemoryModule {
    /// Creates a module with an initial state.
    pub fn new(name: impl Into<String>, initial: Value) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(initial),
            hooks: RwLock::new(Vec::new()),
            applied: AtomicU64::new(0),
        }
    }

    /// Applies a user write.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        self.write(f, MutationOrigin::User);
    }

    /// Applies a write flagged as internal.
    pub fn update_internal(&self, f: impl FnOnce(&mut Value)) {
        self.write(f, MutationOrigin::Internal);
    }

    /// Replaces the whole state as a user write.
    pub fn set(&self, value: Value) {
        self.update(|state| *state = value);
    }

    /// Returns a copy of the state.
    pub fn state(&self) -> Value {
        self.state.read().clone()
    }

    /// Number of imports applied.
    pub fn apply_count(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    fn write(&self, f: impl FnOnce(&mut Value), origin: MutationOrigin) {
        {
            let mut state = self.state.write();
            f(&mut state);
        }

        // Hooks run without the state lock so they may take snapshots.
        let hooks = self.hooks.read().clone();
        let mutation = Mutation {
            module: self.name.clone(),
            origin,
        };
        for hook in hooks {
            hook(&mutation);
        }
    }
}

impl Syncable for MemoryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> Snapshot {
        self.state()
    }

    fn apply_without_sync(&self, state: Snapshot) -> SyncResult<()> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.set(state);
        Ok(())
    }

    fn on_mutate(&self, hook: MutationHook) {
        self.hooks.write().push(hook);
    }
}

impl std::fmt::Debug for MemoryModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryModule")
            .field("name", &self.name)
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn update_notifies_hooks() {
        let module = MemoryModule::new("profile", json!({"name": "Ada"}));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        module.on_mutate(Arc::new(move |m: &Mutation| sink.lock().push(m.clone())));

        module.update(|s| s["name"] = json!("Grace"));
        module.update_internal(|s| s["timerRunning"] = json!(true));

        assert_eq!(module.state()["name"], json!("Grace"));
        assert_eq!(
            *seen.lock(),
            vec![Mutation::user("profile"), Mutation::internal("profile")]
        );
    }

    #[test]
    fn hooks_may_read_snapshot() {
        let module = Arc::new(MemoryModule::new("tasks", json!([])));
        let observed = Arc::new(Mutex::new(Value::Null));
        let (m, o) = (module.clone(), observed.clone());
        module.on_mutate(Arc::new(move |_: &Mutation| *o.lock() = m.snapshot()));

        module.set(json!([1]));
        assert_eq!(*observed.lock(), json!([1]));
    }

    #[test]
    fn apply_replaces_state() {
        let module = MemoryModule::new("sleep", json!({"hours": 7}));
        module.apply_without_sync(json!({"hours": 8})).unwrap();
        assert_eq!(module.snapshot(), json!({"hours": 8}));
        assert_eq!(module.apply_count(), 1);
        assert_eq!(module.name(), "sleep");
    }
}
