//! In-memory key-value store for testing.

use crate::error::StorageResult;
use crate::store::{validate_key, KeyValueStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// This store keeps all values in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need to survive a restart
///
/// # Example
///
/// ```rust
/// use driftsync_storage::{InMemoryStore, KeyValueStore};
///
/// let store = InMemoryStore::new();
/// store.put("last-sync-timestamp", b"2024-01-01T00:00:00Z").unwrap();
/// assert_eq!(store.keys().unwrap(), vec!["last-sync-timestamp".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing values.
    ///
    /// Useful for testing startup and corruption scenarios.
    #[must_use]
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            values: RwLock::new(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Clears all values.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.values.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.values.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.values.write().remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("device-id").unwrap(), None);
    }

    #[test]
    fn memory_put_replaces_value() {
        let store = InMemoryStore::new();
        store.put("device-id", b"first").unwrap();
        store.put("device-id", b"second").unwrap();

        assert_eq!(store.get("device-id").unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_delete() {
        let store = InMemoryStore::new();
        store.put("cache-snapshot", b"data").unwrap();

        assert!(store.delete("cache-snapshot").unwrap());
        assert!(!store.delete("cache-snapshot").unwrap());
        assert_eq!(store.get("cache-snapshot").unwrap(), None);
    }

    #[test]
    fn memory_keys_are_sorted() {
        let store = InMemoryStore::with_values([
            ("b", b"2".to_vec()),
            ("a", b"1".to_vec()),
            ("c", b"3".to_vec()),
        ]);
        assert_eq!(store.keys().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn memory_rejects_invalid_keys() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.put("../x", b"1"),
            Err(StorageError::InvalidKey { .. })
        ));
    }

    #[test]
    fn memory_clear() {
        let store = InMemoryStore::new();
        store.put("a", b"1").unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
