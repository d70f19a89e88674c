//! # driftsync Codec
//!
//! Canonical serialization and the compression pipeline for state snapshots.
//!
//! This crate provides:
//! - Canonical JSON: identical snapshots produce identical bytes regardless
//!   of the order keys were inserted in, so they hash identically
//! - A size-aware compression pipeline (gzip level 6 above 1 KiB, raw below)
//! - The base64 wire envelope used by the JSON-based transport
//!
//! ## Canonical JSON Rules
//!
//! - Object keys are sorted bytewise (UTF-8), recursively
//! - No insignificant whitespace
//! - Strings and numbers are written exactly as `serde_json` writes them
//!
//! ## Usage
//!
//! ```
//! use driftsync_codec::{compress, decompress, to_canonical_json, CompressionConfig};
//! use serde_json::json;
//!
//! let snapshot = json!({"tasks": [], "profile": {"name": "Ada"}});
//! let envelope = compress(&snapshot, &CompressionConfig::default()).unwrap();
//! assert!(!envelope.compressed);
//!
//! let restored = decompress(&envelope).unwrap();
//! assert_eq!(to_canonical_json(&restored).unwrap(), to_canonical_json(&snapshot).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod compression;
mod error;
mod wire;

pub use canonical::{canonicalize, to_canonical_json, to_canonical_json_from, CanonicalEncoder};
pub use compression::{
    compress, compress_bytes, decompress, decompress_bytes, CompressionConfig, CompressionEnvelope,
    CompressionFormat, DEFAULT_COMPRESSION_LEVEL, DEFAULT_COMPRESSION_THRESHOLD,
};
pub use error::{CodecError, CodecResult};
pub use wire::{decode_download, encode_for_upload, WireEnvelope};
