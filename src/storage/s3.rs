//! S3 storage backend
//!
//! Buckets play the role of containers and object keys the role of blobs.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::types::{AccountCredentials, BlobEntry, DeleteOptions, DownloadOptions};
use crate::{Error, Result};

use super::{length_mismatch, BlobBackend, BlobSink, BlobSource};

/// Region that rejects an explicit bucket location constraint
pub const DEFAULT_REGION: &str = "us-east-1";

/// Uploads up to this size go out as a single PutObject
pub const MULTIPART_PART_SIZE: u64 = 8 * 1024 * 1024;

const MAX_PARTS: u64 = 10_000;

/// DeleteObjects accepts at most this many keys per request
const DELETE_BATCH: usize = 1000;

const CREDENTIALS_PROVIDER: &str = "blobway-static";

/// Client settings handed straight to the SDK
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub region: String,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub operation_timeout_secs: Option<u64>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            force_path_style: false,
            operation_timeout_secs: None,
        }
    }
}

/// S3 storage backend
pub struct S3Backend {
    client: Client,
    region: String,
}

impl S3Backend {
    /// Build a client from static credentials. The account is used as the
    /// access key id and the access key as the secret.
    ///
    /// Nothing is loaded from the environment and no request is sent.
    pub fn new(credentials: &AccountCredentials, settings: S3Settings) -> Result<Self> {
        if settings.region.trim().is_empty() {
            return Err(Error::configuration("S3 region must not be empty"));
        }

        let static_credentials = Credentials::new(
            credentials.account(),
            credentials.access_key(),
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(static_credentials)
            .force_path_style(settings.force_path_style);

        if let Some(endpoint_url) = settings.endpoint {
            builder = builder.endpoint_url(endpoint_url);
        }

        if let Some(secs) = settings.operation_timeout_secs {
            builder = builder.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(secs))
                    .build(),
            );
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            region: settings.region,
        })
    }
}

fn backend_error<E>(operation: &str, err: E) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code = err.code().map(str::to_string);
    let detail = match err.message() {
        Some(message) => message.to_string(),
        None => DisplayErrorContext(&err).to_string(),
    };
    Error::Backend {
        code,
        message: format!("S3 {} failed: {}", operation, detail),
    }
}

/// CreateBucket error codes meaning the caller already has the bucket
fn container_already_exists(code: Option<&str>) -> bool {
    code == Some("BucketAlreadyOwnedByYou")
}

fn container_missing(code: Option<&str>) -> bool {
    code == Some("NoSuchBucket")
}

/// HeadObject answers a bare 404 for both a missing key and a missing bucket
fn missing_blob(container: &str, blob: &str) -> Error {
    Error::backend_code(
        "NoSuchKey",
        format!(
            "S3 delete failed: bucket or key not found ('{}' in '{}')",
            blob, container
        ),
    )
}

/// Part size for a multipart upload of `size_bytes`, kept under the part limit
fn part_size(size_bytes: u64) -> u64 {
    MULTIPART_PART_SIZE.max(size_bytes.div_ceil(MAX_PARTS))
}

fn read_error(err: std::io::Error) -> Error {
    Error::backend(format!("S3 put failed reading source: {}", err))
}

impl S3Backend {
    async fn put_single(
        &self,
        container: &str,
        blob: &str,
        source: BlobSource<'_>,
        size_bytes: u64,
    ) -> Result<()> {
        // One byte past the declared size tells a longer stream apart
        let mut data = Vec::new();
        source
            .take(size_bytes + 1)
            .read_to_end(&mut data)
            .await
            .map_err(read_error)?;
        if data.len() as u64 != size_bytes {
            return Err(length_mismatch(size_bytes, data.len() as u64));
        }

        self.client
            .put_object()
            .bucket(container)
            .key(blob)
            .content_length(size_bytes as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| backend_error("put", e))?;

        Ok(())
    }

    async fn put_multipart(
        &self,
        container: &str,
        blob: &str,
        source: BlobSource<'_>,
        size_bytes: u64,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(container)
            .key(blob)
            .send()
            .await
            .map_err(|e| backend_error("create multipart upload", e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::backend("S3 create multipart upload failed: missing upload id"))?
            .to_string();

        let outcome = self
            .upload_parts(container, blob, &upload_id, source, size_bytes)
            .await;
        let parts = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                self.abort_upload(container, blob, &upload_id).await;
                return Err(err);
            }
        };

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(container)
            .key(blob)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;
        if let Err(err) = completed {
            self.abort_upload(container, blob, &upload_id).await;
            return Err(backend_error("complete multipart upload", err));
        }

        Ok(())
    }

    /// Stream `size_bytes` from `source` one part at a time
    async fn upload_parts(
        &self,
        container: &str,
        blob: &str,
        upload_id: &str,
        source: BlobSource<'_>,
        size_bytes: u64,
    ) -> Result<Vec<CompletedPart>> {
        let chunk = part_size(size_bytes);
        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1i32;

        while sent < size_bytes {
            let want = chunk.min(size_bytes - sent);
            let mut data = Vec::with_capacity(want as usize);
            (&mut *source)
                .take(want)
                .read_to_end(&mut data)
                .await
                .map_err(read_error)?;
            if (data.len() as u64) < want {
                return Err(length_mismatch(size_bytes, sent + data.len() as u64));
            }

            let response = self
                .client
                .upload_part()
                .bucket(container)
                .key(blob)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(want as i64)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| backend_error("upload part", e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            sent += want;
            part_number += 1;
        }

        let mut extra = [0u8; 1];
        if source.read(&mut extra).await.map_err(read_error)? > 0 {
            return Err(length_mismatch(size_bytes, size_bytes + 1));
        }

        Ok(parts)
    }

    async fn abort_upload(&self, container: &str, blob: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(container)
            .key(blob)
            .upload_id(upload_id)
            .send()
            .await;
        if let Err(err) = aborted {
            tracing::warn!(
                bucket = container,
                key = blob,
                upload_id,
                error = %DisplayErrorContext(&err),
                "Failed to abort multipart upload"
            );
        }
    }

    /// Delete every object in the bucket, in batches DeleteObjects accepts
    async fn purge(&self, container: &str, entries: Vec<BlobEntry>) -> Result<()> {
        for batch in entries.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|entry| ObjectIdentifier::builder().key(&entry.name).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::backend(format!("S3 purge failed: {}", e)))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| Error::backend(format!("S3 purge failed: {}", e)))?;

            let response = self
                .client
                .delete_objects()
                .bucket(container)
                .delete(delete)
                .send()
                .await
                .map_err(|e| backend_error("delete objects", e))?;

            if let Some(failed) = response.errors().first() {
                return Err(Error::Backend {
                    code: failed.code().map(str::to_string),
                    message: format!(
                        "S3 purge failed on key '{}': {}",
                        failed.key().unwrap_or_default(),
                        failed.message().unwrap_or("unknown error")
                    ),
                });
            }
        }

        tracing::debug!(bucket = container, objects = entries.len(), "Bucket purged");
        Ok(())
    }
}

#[async_trait]
impl BlobBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool> {
        let mut request = self.client.create_bucket().bucket(container);

        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(err) if container_already_exists(err.code()) => Ok(false),
            Err(err) => Err(backend_error("create bucket", err)),
        }
    }

    async fn delete_container_if_exists(&self, container: &str) -> Result<bool> {
        // DeleteBucket refuses non-empty buckets, so empty it first
        let entries = match self.list_blobs(container).await {
            Ok(entries) => entries,
            Err(err) if container_missing(err.code()) => return Ok(false),
            Err(err) => return Err(err),
        };
        if !entries.is_empty() {
            self.purge(container, entries).await?;
        }

        match self.client.delete_bucket().bucket(container).send().await {
            Ok(_) => Ok(true),
            Err(err) if container_missing(err.code()) => Ok(false),
            Err(err) => Err(backend_error("delete bucket", err)),
        }
    }

    async fn list_blobs(&self, container: &str) -> Result<Vec<BlobEntry>> {
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(container)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| backend_error("list", e))?;

            entries.extend(response.contents().iter().filter_map(|obj| {
                obj.key().map(|key| BlobEntry {
                    name: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(entries)
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        source: BlobSource<'_>,
        size_bytes: u64,
    ) -> Result<()> {
        if i64::try_from(size_bytes).is_err() {
            return Err(Error::backend(format!(
                "S3 put failed: size {} too large",
                size_bytes
            )));
        }

        if size_bytes <= MULTIPART_PART_SIZE {
            self.put_single(container, blob, source, size_bytes).await
        } else {
            self.put_multipart(container, blob, source, size_bytes).await
        }
    }

    async fn get_blob(
        &self,
        container: &str,
        blob: &str,
        dest: BlobSink<'_>,
        options: &DownloadOptions,
    ) -> Result<u64> {
        let mut request = self.client.get_object().bucket(container).key(blob);
        if let Some(range) = options.range {
            request = request.range(range.to_header());
        }

        let response = request
            .send()
            .await
            .map_err(|e| backend_error("get", e))?;

        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| Error::backend(format!("S3 body read failed: {}", e)))?
        {
            dest.write_all(&chunk)
                .await
                .map_err(|e| Error::backend(format!("S3 get failed writing sink: {}", e)))?;
            written += chunk.len() as u64;
        }
        dest.flush()
            .await
            .map_err(|e| Error::backend(format!("S3 get failed flushing sink: {}", e)))?;

        Ok(written)
    }

    async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        options: &DeleteOptions,
    ) -> Result<()> {
        // DeleteObject succeeds on missing keys, so check first.
        match self
            .client
            .head_object()
            .bucket(container)
            .key(blob)
            .set_version_id(options.version_id.clone())
            .send()
            .await
        {
            Ok(_) => {}
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                return Err(missing_blob(container, blob));
            }
            Err(err) => return Err(backend_error("head", err)),
        }

        self.client
            .delete_object()
            .bucket(container)
            .key(blob)
            .set_version_id(options.version_id.clone())
            .send()
            .await
            .map_err(|e| backend_error("delete", e))?;

        Ok(())
    }
}
