//! Blobway - a uniform async adapter over container/blob object storage
//!
//! Blobway binds to one storage account and exposes a closed set of
//! container and blob operations:
//! - ensure a container exists, delete it if it exists
//! - upload from and download to async streams
//! - list and delete blobs
//!
//! Each operation resolves to an [`OperationResult`] on success or an
//! [`Error`] carrying the backend's own code and message.

pub mod adapter;
pub mod config;
pub mod error;
pub mod storage;
pub mod types;

pub use adapter::StorageAdapter;
pub use error::{Error, Result};
pub use storage::{BackendConfig, BlobBackend};
pub use types::{
    AccountCredentials, BlobEntry, ByteRange, DeleteOptions, DownloadOptions, OperationResult,
    ResultStatus,
};
