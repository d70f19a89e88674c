//! File-directory key-value store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, KeyValueStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the state directory.
const LOCK_FILE: &str = ".lock";
/// Suffix used for in-progress writes.
const TEMP_SUFFIX: &str = ".tmp";

/// A key-value store backed by a directory, one file per key.
///
/// Values survive process restarts.
///
/// # Durability
///
/// `put` writes to a temporary file, syncs it, then renames it over the
/// previous value. A crash mid-write leaves the old value in place.
///
/// # Exclusivity
///
/// The directory is guarded by an exclusive lock on `.lock`, so only one
/// sync engine per device works on a given state directory. The lock is
/// released when the store is dropped.
///
/// # Example
///
/// ```no_run
/// use driftsync_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-state")).unwrap();
/// store.put("device-id", b"5f0c").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    _lock_file: File,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens or creates a store in `path`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the
    /// directory, or an I/O error if it cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the state directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let final_path = self.value_path(key);
        let temp_path = self.path.join(format!("{key}{TEMP_SUFFIX}"));

        {
            let mut file = File::create(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;

        tracing::trace!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(TEMP_SUFFIX) || validate_key(&name).is_err() {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }
}
