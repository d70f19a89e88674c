//! Error types for the sync engine.

use driftsync_codec::CodecError;
use driftsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A snapshot could not be compressed or a downloaded payload could not
    /// be restored.
    #[error("compression error: {0}")]
    Compression(#[from] CodecError),

    /// Content hashing is unavailable; callers fall back to always syncing.
    #[error("cache degraded: {0}")]
    CacheDegraded(String),

    /// A remote snapshot failed validation and was not applied.
    #[error("import rejected: {0}")]
    ImportValidation(String),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persisted state could not be encoded.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A module rejected an imported state.
    #[error("module {module} failed to apply state: {message}")]
    Apply {
        /// Module name.
        module: String,
        /// Error message.
        message: String,
    },

    /// The engine is offline or not authenticated.
    #[error("not online and authenticated")]
    NotReady,

    /// The coordinator task is no longer running.
    #[error("sync coordinator stopped")]
    CoordinatorStopped,

    /// A coordinator is already running for this service.
    #[error("sync coordinator already running")]
    CoordinatorAlreadyRunning,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotReady => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("403 forbidden").is_retryable());
        assert!(SyncError::NotReady.is_retryable());
        assert!(!SyncError::ImportValidation("not an object".into()).is_retryable());
        assert!(!SyncError::Compression(CodecError::decompression("bad")).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::CoordinatorStopped;
        assert_eq!(err.to_string(), "sync coordinator stopped");

        let err = SyncError::Apply {
            module: "profile".into(),
            message: "bad shape".into(),
        };
        assert!(err.to_string().contains("profile"));
        assert!(err.to_string().contains("bad shape"));
    }

    #[test]
    fn codec_errors_convert() {
        let err: SyncError = CodecError::UnknownFormat("zstd".into()).into();
        assert!(matches!(err, SyncError::Compression(_)));
    }
}
