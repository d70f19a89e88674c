//! Unpack command implementation.

use super::write_output;
use driftsync_engine::SnapshotDocument;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Runs the unpack command.
///
/// Fails without writing anything if the document is malformed or its
/// content hash does not match.
pub fn run(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let (document, snapshot) = unpack(input)?;
    eprintln!("✓ Document valid");
    eprintln!("  Device:  {}", document.device_id);
    eprintln!("  App:     {}", document.app_version);
    eprintln!("  Created: {}", document.created_at.to_rfc3339());
    eprintln!("  Hash:    {}", document.content_hash);
    eprintln!(
        "  Payload: {} ({} -> {} bytes)",
        document.envelope.format, document.envelope.original_size, document.envelope.compressed_size
    );

    let bytes = serde_json::to_vec_pretty(&snapshot)?;
    write_output(output, &bytes)
}

fn unpack(input: &Path) -> Result<(SnapshotDocument, Value), Box<dyn std::error::Error>> {
    let bytes = fs::read(input)?;
    let document = SnapshotDocument::from_bytes(&bytes)?;
    let snapshot = document.decode()?;
    Ok((document, snapshot))
}
