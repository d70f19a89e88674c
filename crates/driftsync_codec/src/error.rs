//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to turn a value into canonical JSON.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
    },

    /// The compressor failed.
    #[error("compression failed: {message}")]
    Compression {
        /// Description of the compressor error.
        message: String,
    },

    /// A payload could not be restored.
    #[error("decompression failed: {cause}")]
    Decompression {
        /// What went wrong.
        cause: String,
    },

    /// The envelope names a format this build does not understand.
    #[error("unknown payload format: {0:?}")]
    UnknownFormat(String),

    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(String),

    /// The restored payload does not have the size the envelope declares.
    #[error("size mismatch: envelope declares {expected} bytes, payload has {actual}")]
    SizeMismatch {
        /// Size declared by the envelope.
        expected: usize,
        /// Size actually restored.
        actual: usize,
    },
}

impl CodecError {
    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a compression error.
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Create a decompression error.
    pub fn decompression(cause: impl Into<String>) -> Self {
        Self::Decompression {
            cause: cause.into(),
        }
    }

    /// Returns true for errors raised while restoring a payload.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            CodecError::Decompression { .. }
                | CodecError::UnknownFormat(_)
                | CodecError::Base64(_)
                | CodecError::SizeMismatch { .. }
        )
    }
}
