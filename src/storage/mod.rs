//! Storage abstraction layer
//!
//! Provides a unified container/blob interface over S3 and the local
//! filesystem. Backends report failures as [`Error::Backend`](crate::Error)
//! carrying the native code and message.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{AccountCredentials, BlobEntry, DeleteOptions, DownloadOptions};
use crate::{Error, Result};

pub mod local;
pub mod s3;

/// Readable source handed to uploads. Owned by the caller.
pub type BlobSource<'a> = &'a mut (dyn AsyncRead + Unpin + Send);

/// Writable sink handed to downloads. Owned by the caller.
pub type BlobSink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

/// Native primitives of a container/blob store
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Create the container unless it already exists.
    ///
    /// Returns `true` if the container was created by this call.
    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool>;

    /// Delete the container and every blob in it, if it exists.
    ///
    /// Returns `true` if a container was deleted, `false` if there was none.
    async fn delete_container_if_exists(&self, container: &str) -> Result<bool>;

    /// List every blob in the container
    async fn list_blobs(&self, container: &str) -> Result<Vec<BlobEntry>>;

    /// Write `size_bytes` bytes from `source` as a blob, replacing any
    /// previous blob of the same name
    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        source: BlobSource<'_>,
        size_bytes: u64,
    ) -> Result<()>;

    /// Stream a blob into `dest`, returning the number of bytes written.
    ///
    /// A range whose end precedes its start is ignored and the whole blob is
    /// returned; a range starting at or past the end fails with `InvalidRange`.
    async fn get_blob(
        &self,
        container: &str,
        blob: &str,
        dest: BlobSink<'_>,
        options: &DownloadOptions,
    ) -> Result<u64>;

    /// Delete an existing blob; a missing blob is an error
    async fn delete_blob(&self, container: &str, blob: &str, options: &DeleteOptions)
        -> Result<()>;
}

/// Error for an upload whose stream length differs from the declared size.
///
/// `read` is the number of bytes actually read, capped at one past `declared`.
pub(crate) fn length_mismatch(declared: u64, read: u64) -> Error {
    let qualifier = if read > declared { " of at least" } else { "" };
    Error::backend_code(
        "InvalidContentLength",
        format!(
            "declared size {} does not match stream length{} {}",
            declared, qualifier, read
        ),
    )
}

/// Backend selection
#[derive(Debug, Clone)]
pub enum BackendConfig {
    S3 {
        region: String,
        endpoint: Option<String>,
        force_path_style: bool,
        operation_timeout_secs: Option<u64>,
    },
    Local {
        root_path: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::S3 {
            region: s3::DEFAULT_REGION.to_string(),
            endpoint: None,
            force_path_style: false,
            operation_timeout_secs: None,
        }
    }
}

/// Create a backend bound to `credentials`.
///
/// Never touches the network: clients connect lazily on first request.
pub fn create_backend(
    credentials: &AccountCredentials,
    config: &BackendConfig,
) -> Result<Arc<dyn BlobBackend>> {
    match config {
        BackendConfig::S3 {
            region,
            endpoint,
            force_path_style,
            operation_timeout_secs,
        } => {
            let settings = s3::S3Settings {
                region: region.clone(),
                endpoint: endpoint.clone(),
                force_path_style: *force_path_style,
                operation_timeout_secs: *operation_timeout_secs,
            };
            let backend = s3::S3Backend::new(credentials, settings)?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Local { root_path } => {
            let backend = local::LocalBackend::new(root_path);
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_mismatch_reports_both_sizes() {
        let err = length_mismatch(100, 12);
        assert_eq!(err.code(), Some("InvalidContentLength"));
        assert!(err.to_string().contains("declared size 100 does not match stream length 12"));

        let err = length_mismatch(5, 6);
        assert!(err.to_string().contains("stream length of at least 6"));
    }
}
