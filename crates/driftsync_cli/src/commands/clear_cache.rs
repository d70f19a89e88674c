//! Clear-cache command implementation.

use super::CommandError;
use driftsync_engine::LocalState;
use driftsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs the clear-cache command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if clear(path)? {
        println!("✓ Cache cleared; the next sync will upload unconditionally");
    } else {
        println!("No cache stored at {:?}", path);
    }
    Ok(())
}

fn clear(path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CommandError::NoState(path.to_path_buf()).into());
    }
    let store = FileStore::open(path)?;
    let state = LocalState::new(Arc::new(store));
    let removed = state.clear_cache()?;
    info!(path = ?path, removed, "cleared content cache");
    Ok(removed)
}
