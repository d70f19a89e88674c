//! # driftsync Storage
//!
//! Durable key-value stores for the state the sync engine keeps on the
//! device: the device id, the last-sync marker and the content cache.
//!
//! Stores are **opaque byte maps**. They do not interpret the values they
//! hold; the engine owns every encoding decision and treats unreadable
//! values as absent.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For tests and ephemeral sessions
//! - [`FileStore`] - One file per key inside a locked state directory
//!
//! ## Example
//!
//! ```rust
//! use driftsync_storage::{InMemoryStore, KeyValueStore};
//!
//! let store = InMemoryStore::new();
//! store.put("device-id", b"5f0c").unwrap();
//! assert_eq!(store.get("device-id").unwrap(), Some(b"5f0c".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::{validate_key, KeyValueStore, MAX_KEY_LEN};
