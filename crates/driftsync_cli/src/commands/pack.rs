//! Pack command implementation.
//!
//! Produces the same document a device uploads, which is handy for seeding
//! a remote store or reproducing an import by hand.

use super::{read_json, write_output};
use chrono::Utc;
use driftsync_codec::CompressionConfig;
use driftsync_engine::{hash_snapshot, HashAlgorithm, SnapshotDocument};
use std::path::Path;
use tracing::info;

/// Runs the pack command.
pub fn run(
    input: &Path,
    output: Option<&Path>,
    device: &str,
    threshold: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = pack(input, device, &CompressionConfig::new(threshold))?;
    info!(
        hash = %document.content_hash,
        format = %document.envelope.format,
        original = document.envelope.original_size,
        compressed = document.envelope.compressed_size,
        "packed snapshot"
    );

    let bytes = serde_json::to_vec_pretty(&document)?;
    write_output(output, &bytes)
}

fn pack(
    input: &Path,
    device: &str,
    compression: &CompressionConfig,
) -> Result<SnapshotDocument, Box<dyn std::error::Error>> {
    let snapshot = read_json(input)?;
    let hashed = hash_snapshot(&snapshot, HashAlgorithm::Sha256)?;
    Ok(SnapshotDocument::build(
        &hashed,
        device,
        format!("driftsync-cli {}", env!("CARGO_PKG_VERSION")),
        Utc::now(),
        compression,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn large_snapshot_is_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("snapshot.json");
        let tasks: Vec<_> = (0..200)
            .map(|i| json!({"id": i, "title": "water the plants", "done": false}))
            .collect();
        fs::write(&input, serde_json::to_vec(&json!({"tasks": tasks})).unwrap()).unwrap();

        let doc = pack(&input, "laptop", &CompressionConfig::default()).unwrap();
        assert_eq!(doc.device_id, "laptop");
        assert_eq!(doc.envelope.format, "gzip");
        assert!(doc.envelope.compressed_size < doc.envelope.original_size);
        assert_eq!(doc.decode().unwrap()["tasks"][199]["id"], json!(199));
    }

    #[test]
    fn writes_document_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("snapshot.json");
        let output = dir.path().join("doc.json");
        fs::write(&input, r#"{"profile":{"name":"Ada"}}"#).unwrap();

        run(&input, Some(&output), "phone", 1024).unwrap();

        let doc = SnapshotDocument::from_bytes(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(doc.envelope.format, "none");
        assert_eq!(doc.decode().unwrap(), json!({"profile": {"name": "Ada"}}));
    }
}
