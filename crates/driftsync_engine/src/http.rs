//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so applications can plug
//! in whichever blocking client they already use.

use crate::error::{SyncError, SyncResult};
use crate::transport::{BlobMetadata, RemoteBlobInfo, RemoteTransport};
use chrono::SecondsFormat;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use url::Url;

/// Header carrying the uploading device id.
pub const DEVICE_HEADER: &str = "x-driftsync-device";
/// Header carrying the snapshot content hash.
pub const HASH_HEADER: &str = "x-driftsync-content-hash";
/// Header carrying the snapshot time (RFC 3339).
pub const MODIFIED_HEADER: &str = "x-driftsync-modified-at";

/// A failed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    /// Response status, if a response was received.
    pub status: Option<u16>,
    /// Error message.
    pub message: String,
}

impl HttpFailure {
    /// A failure before any response arrived.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// A non-success response.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Network errors, throttling and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(code) => code == 408 || code == 429 || code >= 500,
        }
    }
}

impl From<HttpFailure> for SyncError {
    fn from(failure: HttpFailure) -> Self {
        let message = match failure.status {
            Some(code) => format!("HTTP {code}: {}", failure.message),
            None => failure.message.clone(),
        };
        SyncError::Transport {
            message,
            retryable: failure.is_retryable(),
        }
    }
}

/// Blocking HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a PUT request and returns the response body.
    fn put(&self, url: &str, headers: &[(&str, String)], body: &[u8]) -> Result<Vec<u8>, HttpFailure>;

    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, HttpFailure>;
}

/// HTTP-based remote transport.
///
/// - `PUT  {base}/snapshots/{name}` uploads a blob, answering with its
///   [`RemoteBlobInfo`] as JSON.
/// - `GET  {base}/snapshots` lists blobs as a JSON array.
/// - `GET  {base}/snapshots/{id}` downloads a blob.
///
/// Names and ids are percent-encoded as single path segments.
pub struct HttpTransport<C: HttpClient> {
    base_url: Url,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns a non-retryable transport error if `base_url` is not an
    /// absolute hierarchical URL.
    pub fn new(base_url: &str, client: C) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::transport_fatal(format!("invalid base URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::transport_fatal(format!(
                "base URL {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            client,
            last_error: RwLock::new(None),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, segment: Option<&str>) -> String {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("snapshots");
            if let Some(segment) = segment {
                segments.push(segment);
            }
        }
        url.into()
    }

    fn track<T>(&self, result: Result<T, HttpFailure>) -> SyncResult<T> {
        match result {
            Ok(value) => {
                *self.last_error.write() = None;
                Ok(value)
            }
            Err(failure) => {
                *self.last_error.write() = Some(failure.message.clone());
                Err(failure.into())
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> SyncResult<T> {
        serde_json::from_slice(body).map_err(|e| {
            let message = format!("malformed response: {e}");
            *self.last_error.write() = Some(message.clone());
            SyncError::transport_fatal(message)
        })
    }
}

impl<C: HttpClient> RemoteTransport for HttpTransport<C> {
    fn put_blob(&self, metadata: &BlobMetadata, payload: &[u8]) -> SyncResult<RemoteBlobInfo> {
        let headers = [
            (DEVICE_HEADER, metadata.device_id.clone()),
            (HASH_HEADER, metadata.content_hash.clone()),
            (
                MODIFIED_HEADER,
                metadata.modified_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        let url = self.url(Some(&metadata.name));
        let body = self.track(self.client.put(&url, &headers, payload))?;
        self.decode(&body)
    }

    fn list_blobs(&self) -> SyncResult<Vec<RemoteBlobInfo>> {
        let body = self.track(self.client.get(&self.url(None)))?;
        self.decode(&body)
    }

    fn get_blob(&self, id: &str) -> SyncResult<Vec<u8>> {
        self.track(self.client.get(&self.url(Some(id))))
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}
