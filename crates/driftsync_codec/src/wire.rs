//! Text-safe envelope for JSON-based transports.

use crate::compression::{compress, decompress, CompressionConfig, CompressionEnvelope};
use crate::error::{CodecError, CodecResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A [`CompressionEnvelope`] with its payload base64-encoded.
///
/// The format is kept as a plain string so an envelope written by a newer
/// client with an unknown format still deserializes and then fails with
/// [`CodecError::UnknownFormat`] instead of a generic parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEnvelope {
    /// Base64 (standard alphabet, padded) payload.
    pub payload: String,
    /// Whether the payload is compressed.
    pub compressed: bool,
    /// Payload encoding (`"gzip"` or `"none"`).
    pub format: String,
    /// Size of the canonical JSON before compression.
    pub original_size: usize,
    /// Size of the decoded payload bytes.
    pub compressed_size: usize,
    /// `compressed_size / original_size`.
    pub ratio: f64,
}

impl WireEnvelope {
    /// Encodes an envelope for the wire.
    pub fn from_envelope(envelope: &CompressionEnvelope) -> Self {
        Self {
            payload: STANDARD.encode(&envelope.payload),
            compressed: envelope.compressed,
            format: envelope.format.as_str().to_string(),
            original_size: envelope.original_size,
            compressed_size: envelope.compressed_size,
            ratio: envelope.ratio,
        }
    }

    /// Decodes the wire form back into an envelope.
    ///
    /// # Errors
    ///
    /// Fails on an unknown format, invalid base64, or a payload whose size
    /// does not match `compressed_size`.
    pub fn to_envelope(&self) -> CodecResult<CompressionEnvelope> {
        let format = self.format.parse()?;
        let payload = STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|e| CodecError::Base64(e.to_string()))?;

        if payload.len() != self.compressed_size {
            return Err(CodecError::SizeMismatch {
                expected: self.compressed_size,
                actual: payload.len(),
            });
        }

        Ok(CompressionEnvelope {
            payload,
            compressed: self.compressed,
            format,
            original_size: self.original_size,
            compressed_size: self.compressed_size,
            ratio: self.ratio,
        })
    }
}

/// Compresses a snapshot and encodes it for upload.
///
/// # Errors
///
/// Fails only if the snapshot cannot be serialized.
pub fn encode_for_upload(snapshot: &Value, config: &CompressionConfig) -> CodecResult<WireEnvelope> {
    let envelope = compress(snapshot, config)?;
    Ok(WireEnvelope::from_envelope(&envelope))
}

/// Decodes a downloaded envelope back into a snapshot.
///
/// # Errors
///
/// Returns a decode error naming the cause; nothing is returned for a
/// partially valid payload.
pub fn decode_download(wire: &WireEnvelope) -> CodecResult<Value> {
    let envelope = wire.to_envelope()?;
    decompress(&envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::to_canonical_json;
    use serde_json::json;

    fn sample(len: usize) -> Value {
        json!({"notes": "lorem ipsum ".repeat(len), "count": len})
    }

    #[test]
    fn upload_download_small() {
        let snapshot = sample(1);
        let wire = encode_for_upload(&snapshot, &CompressionConfig::default()).unwrap();
        assert_eq!(wire.format, "none");
        assert!(!wire.compressed);
        assert_eq!(decode_download(&wire).unwrap(), snapshot);
    }

    #[test]
    fn upload_download_large() {
        let snapshot = sample(500);
        let wire = encode_for_upload(&snapshot, &CompressionConfig::default()).unwrap();
        assert_eq!(wire.format, "gzip");
        assert!(wire.compressed);
        assert_eq!(decode_download(&wire).unwrap(), snapshot);
    }

    #[test]
    fn wire_json_uses_camel_case() {
        let wire = encode_for_upload(&sample(1), &CompressionConfig::default()).unwrap();
        let text = serde_json::to_string(&wire).unwrap();
        assert!(text.contains("\"originalSize\""));
        assert!(text.contains("\"compressedSize\""));

        let parsed: WireEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, wire);
    }

    #[test]
    fn payload_is_base64_of_canonical_bytes() {
        let snapshot = sample(1);
        let wire = encode_for_upload(&snapshot, &CompressionConfig::default()).unwrap();
        let decoded = STANDARD.decode(wire.payload.as_bytes()).unwrap();
        assert_eq!(decoded, to_canonical_json(&snapshot).unwrap());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let mut wire = encode_for_upload(&sample(1), &CompressionConfig::default()).unwrap();
        wire.format = "zstd".into();
        assert!(matches!(
            decode_download(&wire),
            Err(CodecError::UnknownFormat(f)) if f == "zstd"
        ));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let mut wire = encode_for_upload(&sample(1), &CompressionConfig::default()).unwrap();
        wire.payload = "***".into();
        assert!(matches!(decode_download(&wire), Err(CodecError::Base64(_))));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut wire = encode_for_upload(&sample(500), &CompressionConfig::default()).unwrap();
        let mut bytes = STANDARD.decode(wire.payload.as_bytes()).unwrap();
        bytes.truncate(bytes.len() - 4);
        wire.payload = STANDARD.encode(&bytes);
        assert!(matches!(
            decode_download(&wire),
            Err(CodecError::SizeMismatch { .. })
        ));
    }
}
