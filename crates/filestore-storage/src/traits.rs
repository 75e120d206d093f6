//! Persistor abstraction trait
//!
//! This module defines the Persistor trait that all storage backends must implement.

use crate::{ByteRange, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
///
/// `NotFound` is the only variant callers are expected to branch on; everything else
/// is a transport or disk failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid byte range: {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of object content as returned by reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Readable byte source accepted by writes.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Persistor abstraction trait
///
/// All storage backends (object store, local filesystem) implement this trait so the
/// file handler can work against either without knowing which one is configured.
/// Writes overwrite whatever was stored at the key before.
#[async_trait]
pub trait Persistor: Send + Sync {
    /// Store the content of a reader at `key`.
    async fn send_stream(&self, bucket: &str, key: &str, reader: ByteReader) -> StorageResult<()>;

    /// Store the content of a local file at `key`. The local file is left in place.
    async fn send_file(&self, bucket: &str, key: &str, source: &Path) -> StorageResult<()>;

    /// Open a stream over the object at `key`, limited to `range` when given.
    ///
    /// Fails with `StorageError::NotFound` when nothing is stored at `key`.
    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream>;

    /// Copy the object at `from_key` to `to_key` within the bucket.
    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Delete the object at `key`. Deleting an absent key succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Delete every object whose key starts with `prefix`. Matching nothing succeeds.
    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()>;

    /// Whether an object is currently stored at `key`.
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Total size in bytes of every object whose key starts with `prefix`.
    async fn directory_size(&self, bucket: &str, prefix: &str) -> StorageResult<u64>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

pub(crate) fn check_range(range: Option<ByteRange>) -> StorageResult<()> {
    match range {
        Some(range) if !range.is_valid() => Err(StorageError::InvalidRange {
            start: range.start,
            end: range.end,
        }),
        _ => Ok(()),
    }
}
