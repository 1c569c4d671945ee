//! Storage adapter
//!
//! [`StorageAdapter`] is bound to one account and exposes exactly six
//! container/blob operations. Every operation goes through the same
//! translation: a backend error is returned to the caller unchanged, and a
//! backend success becomes an [`OperationResult`] with status `SUCCESS`
//! (plus `num_entries` for listings).

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::instrument;

use crate::storage::{create_backend, BackendConfig, BlobBackend};
use crate::types::{AccountCredentials, DeleteOptions, DownloadOptions, OperationResult};
use crate::Result;

/// Handle bound to a single storage account
#[derive(Clone)]
pub struct StorageAdapter {
    credentials: AccountCredentials,
    backend: Arc<dyn BlobBackend>,
}

impl StorageAdapter {
    /// Bind to an S3 account with default client settings.
    ///
    /// Fails with [`Error::Configuration`](crate::Error::Configuration) if
    /// either value is empty. No request is made until the first operation.
    pub fn bind(account: impl Into<String>, access_key: impl Into<String>) -> Result<Self> {
        Self::bind_with(account, access_key, &BackendConfig::default())
    }

    /// Bind to an account on the backend selected by `config`.
    pub fn bind_with(
        account: impl Into<String>,
        access_key: impl Into<String>,
        config: &BackendConfig,
    ) -> Result<Self> {
        let credentials = AccountCredentials::new(account, access_key)?;
        let backend = create_backend(&credentials, config)?;
        Ok(Self::with_backend(credentials, backend))
    }

    /// Wrap an already constructed backend.
    pub fn with_backend(credentials: AccountCredentials, backend: Arc<dyn BlobBackend>) -> Self {
        tracing::debug!(
            account = credentials.account(),
            backend = backend.name(),
            "Bound storage adapter"
        );
        Self {
            credentials,
            backend,
        }
    }

    pub fn account(&self) -> &str {
        self.credentials.account()
    }

    /// Make sure the container exists, creating it if needed.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn ensure_container(&self, name: &str) -> Result<OperationResult> {
        let outcome = self.backend.create_container_if_not_exists(name).await;
        translate("ensure_container", outcome, |created| {
            tracing::debug!(created, "Container ready");
            OperationResult::success()
        })
    }

    /// Count the blobs currently in `container`.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn list_blobs(&self, container: &str) -> Result<OperationResult> {
        let outcome = self.backend.list_blobs(container).await;
        translate("list_blobs", outcome, |entries| {
            OperationResult::listed(entries.len())
        })
    }

    /// Upload `size_bytes` bytes read from `source` as `blob`.
    ///
    /// The source stays open; releasing it is up to the caller on both the
    /// success and the error path.
    #[instrument(skip(self, source), fields(backend = self.backend.name()))]
    pub async fn upload_blob<R>(
        &self,
        container: &str,
        blob: &str,
        source: &mut R,
        size_bytes: u64,
    ) -> Result<OperationResult>
    where
        R: AsyncRead + Unpin + Send,
    {
        let outcome = self
            .backend
            .put_blob(container, blob, source, size_bytes)
            .await;
        translate("upload_blob", outcome, |()| OperationResult::success())
    }

    /// Download `blob` into `dest`. The sink is flushed but not shut down.
    #[instrument(skip(self, dest), fields(backend = self.backend.name()))]
    pub async fn download_blob<W>(
        &self,
        container: &str,
        blob: &str,
        dest: &mut W,
        options: Option<&DownloadOptions>,
    ) -> Result<OperationResult>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let defaults = DownloadOptions::default();
        let options = options.unwrap_or(&defaults);
        let outcome = self.backend.get_blob(container, blob, dest, options).await;
        translate("download_blob", outcome, |bytes| {
            tracing::debug!(bytes, "Blob downloaded");
            OperationResult::success()
        })
    }

    /// Delete an existing blob.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        options: Option<&DeleteOptions>,
    ) -> Result<OperationResult> {
        let defaults = DeleteOptions::default();
        let options = options.unwrap_or(&defaults);
        let outcome = self.backend.delete_blob(container, blob, options).await;
        translate("delete_blob", outcome, |()| OperationResult::success())
    }

    /// Delete the container, succeeding as well when it does not exist.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn delete_container_if_exists(&self, container: &str) -> Result<OperationResult> {
        let outcome = self.backend.delete_container_if_exists(container).await;
        translate("delete_container_if_exists", outcome, |deleted| {
            tracing::debug!(deleted, "Container gone");
            OperationResult::success()
        })
    }
}

impl fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("credentials", &self.credentials)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Turn a backend outcome into the adapter's result shape.
fn translate<T>(
    operation: &'static str,
    outcome: Result<T>,
    on_success: impl FnOnce(T) -> OperationResult,
) -> Result<OperationResult> {
    match outcome {
        Ok(value) => {
            let result = on_success(value);
            tracing::debug!(operation, ?result, "Operation succeeded");
            Ok(result)
        }
        Err(err) => {
            tracing::warn!(operation, error = %err, "Operation failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlobSink, BlobSource};
    use crate::types::{BlobEntry, ResultStatus};
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend that records calls and replays canned answers
    #[derive(Default)]
    struct ScriptedBackend {
        calls: Mutex<Vec<String>>,
        fail_with: Option<&'static str>,
        entries: usize,
    }

    impl ScriptedBackend {
        fn failing(code: &'static str) -> Self {
            Self {
                fail_with: Some(code),
                ..Self::default()
            }
        }

        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            match self.fail_with {
                Some(code) => Err(Error::backend_code(code, "scripted failure")),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl BlobBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn create_container_if_not_exists(&self, container: &str) -> Result<bool> {
            self.record(format!("create {container}"))?;
            Ok(true)
        }

        async fn delete_container_if_exists(&self, container: &str) -> Result<bool> {
            self.record(format!("drop {container}"))?;
            Ok(false)
        }

        async fn list_blobs(&self, container: &str) -> Result<Vec<BlobEntry>> {
            self.record(format!("list {container}"))?;
            Ok((0..self.entries)
                .map(|i| BlobEntry {
                    name: format!("blob-{i}"),
                    size: 0,
                })
                .collect())
        }

        async fn put_blob(
            &self,
            container: &str,
            blob: &str,
            _source: BlobSource<'_>,
            size_bytes: u64,
        ) -> Result<()> {
            self.record(format!("put {container}/{blob} {size_bytes}"))
        }

        async fn get_blob(
            &self,
            container: &str,
            blob: &str,
            _dest: BlobSink<'_>,
            options: &DownloadOptions,
        ) -> Result<u64> {
            self.record(format!("get {container}/{blob} {:?}", options.range))?;
            Ok(0)
        }

        async fn delete_blob(
            &self,
            container: &str,
            blob: &str,
            options: &DeleteOptions,
        ) -> Result<()> {
            self.record(format!("delete {container}/{blob} {:?}", options.version_id))
        }
    }

    fn adapter(backend: Arc<ScriptedBackend>) -> StorageAdapter {
        let credentials = AccountCredentials::new("account", "key").unwrap();
        StorageAdapter::with_backend(credentials, backend)
    }

    #[test]
    fn bind_rejects_empty_credentials() {
        assert!(matches!(
            StorageAdapter::bind("", "key"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            StorageAdapter::bind("account", ""),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn bind_is_lazy() {
        let adapter = StorageAdapter::bind("account", "key").unwrap();
        assert_eq!(adapter.account(), "account");
        assert!(!format!("{adapter:?}").contains("\"key\""));
    }

    #[tokio::test]
    async fn success_results_only_count_on_list() {
        let backend = Arc::new(ScriptedBackend {
            entries: 4,
            ..ScriptedBackend::default()
        });
        let adapter = adapter(backend.clone());

        let result = adapter.ensure_container("c").await.unwrap();
        assert_eq!(result, OperationResult::success());

        let result = adapter.list_blobs("c").await.unwrap();
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.num_entries, Some(4));

        let mut source: &[u8] = b"data";
        let result = adapter.upload_blob("c", "b", &mut source, 4).await.unwrap();
        assert_eq!(result.num_entries, None);

        let mut sink = Vec::new();
        let result = adapter
            .download_blob("c", "b", &mut sink, None)
            .await
            .unwrap();
        assert!(result.is_success());

        let options = DeleteOptions {
            version_id: Some("v1".to_string()),
        };
        adapter.delete_blob("c", "b", Some(&options)).await.unwrap();
        adapter.delete_container_if_exists("c").await.unwrap();

        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "create c",
                "list c",
                "put c/b 4",
                "get c/b None",
                "delete c/b Some(\"v1\")",
                "drop c",
            ]
        );
    }

    #[tokio::test]
    async fn backend_errors_propagate_unchanged() {
        let adapter = adapter(Arc::new(ScriptedBackend::failing("AuthorizationFailure")));

        let err = adapter.ensure_container("c").await.unwrap_err();
        assert_eq!(err.code(), Some("AuthorizationFailure"));

        let err = adapter.list_blobs("c").await.unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));

        let mut sink = Vec::new();
        let err = adapter
            .download_blob("c", "b", &mut sink, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("AuthorizationFailure"));

        let err = adapter.delete_container_if_exists("c").await.unwrap_err();
        assert_eq!(err.code(), Some("AuthorizationFailure"));
    }
}
