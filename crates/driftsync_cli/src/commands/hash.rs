//! Hash command implementation.

use super::{read_json, CommandError};
use driftsync_engine::{hash_snapshot, HashAlgorithm, HashedSnapshot};
use std::path::Path;

/// Runs the hash command.
pub fn run(file: &Path, algorithm: &str) -> Result<(), Box<dyn std::error::Error>> {
    let hashed = hash_file(file, parse_algorithm(algorithm)?)?;
    println!("{}", hashed.hash);
    println!("  Canonical size: {} bytes", hashed.canonical.len());
    Ok(())
}

fn hash_file(file: &Path, algorithm: HashAlgorithm) -> Result<HashedSnapshot, Box<dyn std::error::Error>> {
    let snapshot = read_json(file)?;
    Ok(hash_snapshot(&snapshot, algorithm)?)
}

pub(crate) fn parse_algorithm(name: &str) -> Result<HashAlgorithm, CommandError> {
    match name.to_ascii_lowercase().as_str() {
        "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
        "fnv1a" | "fnv-1a" => Ok(HashAlgorithm::Fnv1a),
        other => Err(CommandError::UnknownAlgorithm(other.to_string())),
    }
}
