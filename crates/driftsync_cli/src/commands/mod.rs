//! CLI command implementations.

pub mod clear_cache;
pub mod hash;
pub mod inspect;
pub mod pack;
pub mod unpack;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by the commands themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The state directory does not exist.
    #[error("no sync state found at {0:?}")]
    NoState(PathBuf),

    /// The requested hash algorithm is not known.
    #[error("unknown hash algorithm: {0} (expected sha256 or fnv1a)")]
    UnknownAlgorithm(String),

    /// An input file is not valid JSON.
    #[error("{path:?} is not valid JSON: {message}")]
    InvalidJson {
        /// The offending file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

/// Reads and parses a JSON file.
pub(crate) fn read_json(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let value = serde_json::from_slice(&bytes).map_err(|e| CommandError::InvalidJson {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(value)
}

/// Writes `bytes` to `output`, or to stdout when no file is given.
pub(crate) fn write_output(
    output: Option<&Path>,
    bytes: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            let mut file = fs::File::create(path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
