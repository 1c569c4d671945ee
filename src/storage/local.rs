//! Local filesystem storage backend
//!
//! Containers are directories under the root, blobs are files inside them.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::types::{BlobEntry, ByteRange, DeleteOptions, DownloadOptions};
use crate::{Error, Result};

use super::{length_mismatch, BlobBackend, BlobSink, BlobSource};

/// Local filesystem storage
pub struct LocalBackend {
    root_path: PathBuf,
}

impl LocalBackend {
    /// The root directory is created lazily by the first container write.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        check_name(container)?;
        if container.contains('/') {
            return Err(Error::backend_code(
                "InvalidResourceName",
                format!("container name '{}' must not contain '/'", container),
            ));
        }
        Ok(self.root_path.join(container))
    }

    /// Resolve a blob path, requiring the container to exist.
    async fn blob_path(&self, container: &str, blob: &str) -> Result<PathBuf> {
        let container_path = self.container_path(container)?;
        check_name(blob)?;
        if !is_dir(&container_path).await? {
            return Err(container_not_found(container));
        }
        Ok(container_path.join(blob))
    }

    /// Resolve an existing blob file. Directories created for nested names
    /// are not blobs.
    async fn blob_file(&self, container: &str, blob: &str) -> Result<(PathBuf, u64)> {
        let path = self.blob_path(container, blob).await?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((path, meta.len())),
            Ok(_) => Err(blob_not_found(container, blob)),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Err(blob_not_found(container, blob))
            }
            Err(e) => Err(io_error("stat blob failed", e)),
        }
    }

    /// Remove directories left empty by a deleted nested blob, stopping at
    /// the container root or the first non-empty directory.
    async fn prune_empty_parents(&self, container: &str, blob_path: &Path) -> Result<()> {
        let container_path = self.container_path(container)?;
        let mut current = blob_path.parent();
        while let Some(dir) = current {
            if dir == container_path.as_path() || !dir.starts_with(&container_path) {
                break;
            }
            match fs::remove_dir(dir).await {
                Ok(()) => current = dir.parent(),
                Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => break,
                // Another writer may have removed it already
                Err(e) if e.kind() == ErrorKind::NotFound => current = dir.parent(),
                Err(e) => return Err(io_error("prune directory failed", e)),
            }
        }
        Ok(())
    }
}

/// Map a download range onto a blob of `len` bytes as `(offset, length)`,
/// following HTTP range semantics.
fn resolve_range(range: Option<ByteRange>, len: u64) -> Result<(u64, u64)> {
    let Some(range) = range else {
        return Ok((0, len));
    };

    // A syntactically invalid range is ignored
    if range.end.is_some_and(|end| end < range.start) {
        return Ok((0, len));
    }
    if range.start >= len {
        return Err(Error::backend_code(
            "InvalidRange",
            format!(
                "range start {} is not satisfiable for a blob of {} bytes",
                range.start, len
            ),
        ));
    }

    let end = range.end.map_or(len - 1, |end| end.min(len - 1));
    Ok((range.start, end - range.start + 1))
}

fn check_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(Error::backend_code(
            "InvalidResourceName",
            format!("invalid resource name '{}'", name),
        ));
    }
    Ok(())
}

fn container_not_found(container: &str) -> Error {
    Error::backend_code(
        "ContainerNotFound",
        format!("container '{}' does not exist", container),
    )
}

fn blob_not_found(container: &str, blob: &str) -> Error {
    Error::backend_code(
        "BlobNotFound",
        format!("blob '{}' does not exist in container '{}'", blob, container),
    )
}

fn io_error(context: &str, err: std::io::Error) -> Error {
    Error::backend_code(format!("{:?}", err.kind()), format!("{}: {}", context, err))
}

async fn is_dir(path: &Path) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("stat failed", e)),
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool> {
        let path = self.container_path(container)?;
        if is_dir(&path).await? {
            return Ok(false);
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error("create container failed", e))?;
        Ok(true)
    }

    async fn delete_container_if_exists(&self, container: &str) -> Result<bool> {
        let path = self.container_path(container)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("delete container failed", e)),
        }
    }

    async fn list_blobs(&self, container: &str) -> Result<Vec<BlobEntry>> {
        let container_path = self.container_path(container)?;
        if !is_dir(&container_path).await? {
            return Err(container_not_found(container));
        }

        let mut results = Vec::new();
        let mut pending = vec![container_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| io_error("list failed", e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("list failed", e))?
            {
                let path = entry.path();
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| io_error("list failed", e))?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(&container_path) {
                    if let Some(s) = relative.to_str() {
                        results.push(BlobEntry {
                            name: s.replace(std::path::MAIN_SEPARATOR, "/"),
                            size: meta.len(),
                        });
                    }
                }
            }
        }

        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        source: BlobSource<'_>,
        size_bytes: u64,
    ) -> Result<()> {
        let path = self.blob_path(container, blob).await?;

        // One extra byte is enough to detect an over-long stream.
        let mut data = Vec::new();
        source
            .take(size_bytes.saturating_add(1))
            .read_to_end(&mut data)
            .await
            .map_err(|e| io_error("read source failed", e))?;

        if data.len() as u64 != size_bytes {
            return Err(length_mismatch(size_bytes, data.len() as u64));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create parent failed", e))?;
        }
        fs::write(&path, &data)
            .await
            .map_err(|e| io_error("write blob failed", e))?;
        Ok(())
    }

    async fn get_blob(
        &self,
        container: &str,
        blob: &str,
        dest: BlobSink<'_>,
        options: &DownloadOptions,
    ) -> Result<u64> {
        let (path, len) = self.blob_file(container, blob).await?;
        let (offset, length) = resolve_range(options.range, len)?;

        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(blob_not_found(container, blob))
            }
            Err(e) => return Err(io_error("open blob failed", e)),
        };
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset))
                .await
                .map_err(|e| io_error("seek failed", e))?;
        }

        let written = tokio::io::copy(&mut file.take(length), &mut *dest)
            .await
            .map_err(|e| io_error("download failed", e))?;

        dest.flush()
            .await
            .map_err(|e| io_error("flush failed", e))?;
        Ok(written)
    }

    async fn delete_blob(
        &self,
        container: &str,
        blob: &str,
        _options: &DeleteOptions,
    ) -> Result<()> {
        // No versioning locally, so version ids have nothing to select.
        let (path, _) = self.blob_file(container, blob).await?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(blob_not_found(container, blob)),
            Err(e) => return Err(io_error("delete blob failed", e)),
        }
        self.prune_empty_parents(container, &path).await
    }
}
