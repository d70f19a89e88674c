//! Canonical JSON encoder.

use crate::error::{CodecError, CodecResult};
use serde::Serialize;
use serde_json::{Map, Value};

/// Encode a snapshot to canonical JSON bytes.
///
/// The output is deterministic:
/// - Object keys are sorted bytewise, at every depth
/// - No whitespace between tokens
/// - Scalars are written exactly as `serde_json` writes them
///
/// Two snapshots that are equal as JSON values always produce the same
/// bytes, whatever order their keys were inserted in.
///
/// # Errors
///
/// Returns an error if writing a scalar fails.
pub fn to_canonical_json(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Serialize any `Serialize` type and encode it canonically.
///
/// # Errors
///
/// Returns an error if the type cannot be represented as JSON (for example a
/// map with non-string keys).
pub fn to_canonical_json_from<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| CodecError::serialization(e.to_string()))?;
    to_canonical_json(&value)
}

/// Returns a copy of `value` whose objects hold their keys in sorted order.
///
/// Only observable when `serde_json` is built with `preserve_order`; the
/// encoder sorts on its own either way.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, item) in entries {
                sorted.insert(key.clone(), canonicalize(item));
            }
            Value::Object(sorted)
        }
        other => other.clone(),
    }
}

/// A canonical JSON encoder.
///
/// Produces the byte form used for content hashing and as the input of the
/// compression pipeline.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => {
                self.buffer.extend_from_slice(b"null");
                Ok(())
            }
            Value::Bool(b) => {
                self.buffer
                    .extend_from_slice(if *b { b"true" } else { b"false" });
                Ok(())
            }
            Value::Number(n) => self.write_scalar(n),
            Value::String(s) => self.write_scalar(s),
            Value::Array(items) => self.encode_array(items),
            Value::Object(map) => self.encode_object(map),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn write_scalar<T: Serialize + ?Sized>(&mut self, scalar: &T) -> CodecResult<()> {
        serde_json::to_writer(&mut self.buffer, scalar)
            .map_err(|e| CodecError::serialization(e.to_string()))
    }

    fn encode_array(&mut self, items: &[Value]) -> CodecResult<()> {
        self.buffer.push(b'[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.buffer.push(b',');
            }
            self.encode(item)?;
        }
        self.buffer.push(b']');
        Ok(())
    }

    fn encode_object(&mut self, map: &Map<String, Value>) -> CodecResult<()> {
        let mut entries: Vec<(&String, &Value)> = map.iter().collect();
        entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        self.buffer.push(b'{');
        for (i, (key, item)) in entries.into_iter().enumerate() {
            if i > 0 {
                self.buffer.push(b',');
            }
            self.write_scalar(key.as_str())?;
            self.buffer.push(b':');
            self.encode(item)?;
        }
        self.buffer.push(b'}');
        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}
