//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 128;

/// A small durable key-value store.
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last successful `put` for the key
/// - `put` replaces the whole value atomically; readers never observe a
///   partially written value
/// - `delete` of a missing key is not an error
/// - Stores must be `Send + Sync`; all methods take `&self`
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Removes `key`. Returns whether a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Lists all keys currently stored, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the keys cannot be enumerated.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Checks that a key is non-empty, short, and made of `[A-Za-z0-9._-]`.
///
/// Keys double as file names in [`super::FileStore`], so anything that could
/// escape the state directory is rejected.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] describing the violation.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let reason = if key.is_empty() {
        Some("key is empty")
    } else if key.len() > MAX_KEY_LEN {
        Some("key is too long")
    } else if key.starts_with('.') {
        Some("key must not start with '.'")
    } else if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        Some("key contains unsupported characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
