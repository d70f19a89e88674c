//! Size-aware compression pipeline for snapshots.

use crate::canonical::to_canonical_json;
use crate::error::{CodecError, CodecResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Payloads smaller than this many bytes are stored raw.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Default gzip level: mid-range, trading CPU for ratio.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Configuration for the compression pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Payloads strictly below this size are never compressed.
    pub threshold: usize,
    /// Gzip level (0-9).
    pub level: u32,
}

impl CompressionConfig {
    /// Creates a configuration with the given threshold and the default level.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Sets the gzip level, clamped to 9.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD)
    }
}

/// Encoding applied to an envelope's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    /// Raw canonical JSON bytes.
    None,
    /// Gzip-compressed canonical JSON bytes.
    Gzip,
}

impl CompressionFormat {
    /// The identifier written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionFormat::None => "none",
            CompressionFormat::Gzip => "gzip",
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionFormat::None),
            "gzip" => Ok(CompressionFormat::Gzip),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

/// A snapshot prepared for transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionEnvelope {
    /// Payload bytes, raw or gzip depending on `format`.
    pub payload: Vec<u8>,
    /// Whether `payload` is compressed.
    pub compressed: bool,
    /// Payload encoding.
    pub format: CompressionFormat,
    /// Size of the canonical JSON before compression.
    pub original_size: usize,
    /// Size of `payload`.
    pub compressed_size: usize,
    /// `compressed_size / original_size`; 1.0 for raw payloads.
    pub ratio: f64,
}

impl CompressionEnvelope {
    /// Wraps bytes without compressing them.
    pub fn raw(bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self {
            payload: bytes,
            compressed: false,
            format: CompressionFormat::None,
            original_size: size,
            compressed_size: size,
            ratio: 1.0,
        }
    }

    /// Bytes saved by compression.
    pub fn saved_bytes(&self) -> usize {
        self.original_size.saturating_sub(self.compressed_size)
    }
}

/// Canonically serializes `snapshot` and compresses it if it is large enough.
///
/// # Errors
///
/// Only fails if the snapshot cannot be serialized. Compressor failures
/// fall back to a raw envelope.
pub fn compress(snapshot: &Value, config: &CompressionConfig) -> CodecResult<CompressionEnvelope> {
    let bytes = to_canonical_json(snapshot)?;
    Ok(compress_bytes(bytes, config))
}

/// Compresses already-serialized bytes according to `config`.
///
/// Never fails: below the threshold, or when gzip fails or does not shrink
/// the payload, the bytes are returned raw.
pub fn compress_bytes(bytes: Vec<u8>, config: &CompressionConfig) -> CompressionEnvelope {
    if bytes.len() < config.threshold {
        return CompressionEnvelope::raw(bytes);
    }

    match gzip(&bytes, config.level) {
        Ok(compressed) if compressed.len() < bytes.len() => {
            let original_size = bytes.len();
            let compressed_size = compressed.len();
            tracing::debug!(original_size, compressed_size, "compressed snapshot");
            CompressionEnvelope {
                payload: compressed,
                compressed: true,
                format: CompressionFormat::Gzip,
                original_size,
                compressed_size,
                ratio: compressed_size as f64 / original_size as f64,
            }
        }
        Ok(_) => CompressionEnvelope::raw(bytes),
        Err(e) => {
            tracing::warn!(error = %e, "compression failed, sending raw payload");
            CompressionEnvelope::raw(bytes)
        }
    }
}

fn gzip(bytes: &[u8], level: u32) -> CodecResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(bytes)
        .map_err(|e| CodecError::compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::compression(e.to_string()))
}

/// Restores the canonical JSON bytes carried by an envelope.
///
/// # Errors
///
/// Returns a decode error if the payload is corrupt or its restored size
/// differs from `original_size`. No partial output is ever returned.
pub fn decompress_bytes(envelope: &CompressionEnvelope) -> CodecResult<Vec<u8>> {
    let bytes = match envelope.format {
        CompressionFormat::None => envelope.payload.clone(),
        CompressionFormat::Gzip => {
            // One byte of slack so an oversized payload is detected, not truncated.
            let limit = envelope.original_size as u64 + 1;
            let mut out = Vec::with_capacity(envelope.original_size);
            GzDecoder::new(envelope.payload.as_slice())
                .take(limit)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::decompression(format!("gzip: {e}")))?;
            out
        }
    };

    if bytes.len() != envelope.original_size {
        return Err(CodecError::SizeMismatch {
            expected: envelope.original_size,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Restores the snapshot carried by an envelope.
///
/// # Errors
///
/// Returns a decode error if the payload cannot be restored or is not JSON.
pub fn decompress(envelope: &CompressionEnvelope) -> CodecResult<Value> {
    let bytes = decompress_bytes(envelope)?;
    serde_json::from_slice(&bytes).map_err(|e| CodecError::decompression(format!("json: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn large_snapshot() -> Value {
        let tasks: Vec<Value> = (0..200)
            .map(|i| json!({"id": i, "title": format!("task number {i}"), "done": i % 3 == 0}))
            .collect();
        json!({"tasks": tasks, "profile": {"name": "Ada"}})
    }

    #[test]
    fn small_snapshot_is_not_compressed() {
        let envelope = compress(&json!({"a": 1}), &CompressionConfig::default()).unwrap();
        assert!(!envelope.compressed);
        assert_eq!(envelope.format, CompressionFormat::None);
        assert_eq!(envelope.ratio, 1.0);
        assert_eq!(envelope.original_size, envelope.compressed_size);
    }

    #[test]
    fn empty_input_never_fails() {
        let envelope = compress_bytes(Vec::new(), &CompressionConfig::default());
        assert_eq!(envelope.format, CompressionFormat::None);
        assert_eq!(decompress_bytes(&envelope).unwrap(), Vec::<u8>::new());

        let envelope = compress(&json!({}), &CompressionConfig::default()).unwrap();
        assert_eq!(decompress(&envelope).unwrap(), json!({}));
    }

    #[test]
    fn threshold_is_exclusive() {
        let config = CompressionConfig::new(64);
        let below = compress_bytes(vec![b'a'; 63], &config);
        assert_eq!(below.format, CompressionFormat::None);

        let at = compress_bytes(vec![b'a'; 64], &config);
        assert_eq!(at.format, CompressionFormat::Gzip);
    }

    #[test]
    fn large_snapshot_is_gzipped() {
        let snapshot = large_snapshot();
        let envelope = compress(&snapshot, &CompressionConfig::default()).unwrap();

        assert!(envelope.compressed);
        assert_eq!(envelope.format, CompressionFormat::Gzip);
        assert!(envelope.compressed_size < envelope.original_size);
        assert!(envelope.ratio < 1.0);
        assert!(envelope.saved_bytes() > 0);

        assert_eq!(decompress(&envelope).unwrap(), snapshot);
        assert_eq!(
            decompress_bytes(&envelope).unwrap(),
            to_canonical_json(&snapshot).unwrap()
        );
    }

    #[test]
    fn incompressible_payload_stays_raw() {
        // xorshift noise does not shrink under gzip
        let mut state = 0x2545_f491_u32;
        let noise: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let envelope = compress_bytes(noise.clone(), &CompressionConfig::default());
        assert_eq!(envelope.format, CompressionFormat::None);
        assert_eq!(envelope.payload, noise);
    }

    #[test]
    fn corrupt_gzip_is_rejected() {
        let mut envelope = compress(&large_snapshot(), &CompressionConfig::default()).unwrap();
        let mid = envelope.payload.len() / 2;
        envelope.payload.truncate(mid);

        let err = decompress(&envelope).unwrap_err();
        assert!(err.is_decode_error());
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut envelope = compress(&large_snapshot(), &CompressionConfig::default()).unwrap();
        envelope.original_size -= 1;
        assert!(matches!(
            decompress_bytes(&envelope),
            Err(CodecError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn raw_payload_that_is_not_json_is_rejected() {
        let envelope = CompressionEnvelope::raw(b"{not json".to_vec());
        assert!(matches!(
            decompress(&envelope),
            Err(CodecError::Decompression { .. })
        ));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("gzip".parse::<CompressionFormat>().unwrap(), CompressionFormat::Gzip);
        assert_eq!("none".parse::<CompressionFormat>().unwrap(), CompressionFormat::None);
        assert!(matches!(
            "brotli".parse::<CompressionFormat>(),
            Err(CodecError::UnknownFormat(_))
        ));
        assert_eq!(CompressionFormat::Gzip.to_string(), "gzip");
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(CompressionConfig::default().with_level(42).level, 9);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn round_trip_restores_canonical_bytes(
            entries in prop::collection::btree_map("[a-z]{1,8}", "[ -~]{0,64}", 0..80)
        ) {
            let snapshot = json!(entries);
            let envelope = compress(&snapshot, &CompressionConfig::default()).unwrap();
            prop_assert_eq!(decompress_bytes(&envelope).unwrap(), to_canonical_json(&snapshot).unwrap());
            if envelope.original_size < DEFAULT_COMPRESSION_THRESHOLD {
                prop_assert_eq!(envelope.format, CompressionFormat::None);
            }
        }
    }
}
