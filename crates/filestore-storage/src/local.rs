use crate::traits::{check_range, ByteReader, ByteStream, Persistor, StorageError, StorageResult};
use crate::{ByteRange, StorageBackend};
use async_trait::async_trait;
use futures::StreamExt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

/// Name prefix of in-flight writes. `%` followed by a non-hex character never appears
/// in a flattened key, so these files cannot collide with stored objects.
const PARTIAL_PREFIX: &str = "%tmp-";

/// Local filesystem persistor
///
/// Each bucket is a directory. Keys are flattened into file names by
/// percent-encoding, which turns `/` into `%2F`. The encoding is injective and
/// preserves prefixes, so prefix operations are a scan of the bucket directory.
#[derive(Clone, Debug, Default)]
pub struct LocalPersistor {
    base_path: Option<PathBuf>,
}

impl LocalPersistor {
    /// Bucket names are used as directory paths as given.
    pub fn new() -> Self {
        Self { base_path: None }
    }

    /// Relative bucket names are resolved under `base_path`.
    ///
    /// # Arguments
    /// * `base_path` - Root directory for buckets (e.g., "/var/lib/filestore")
    pub async fn with_base_path(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalPersistor {
            base_path: Some(base_path),
        })
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        if bucket.is_empty() {
            return Err(StorageError::InvalidKey("Bucket must not be empty".to_string()));
        }
        match self.base_path {
            Some(ref base) => {
                if Path::new(bucket)
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
                {
                    return Err(StorageError::InvalidKey(
                        "Bucket resolves outside storage directory".to_string(),
                    ));
                }
                Ok(base.join(bucket.trim_start_matches('/')))
            }
            None => Ok(PathBuf::from(bucket)),
        }
    }

    /// Flatten a key into a single file name.
    fn filter_name(key: &str) -> StorageResult<String> {
        if key.is_empty() || key == "." || key == ".." {
            return Err(StorageError::InvalidKey(format!(
                "Storage key {:?} cannot be used as a file name",
                key
            )));
        }
        Ok(urlencoding::encode(key).into_owned())
    }

    fn key_to_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        Ok(self.bucket_dir(bucket)?.join(Self::filter_name(key)?))
    }

    /// Write `reader` next to `path` and rename it into place once fully synced, so a
    /// reader never observes a partially written object.
    async fn write_atomic<R>(&self, path: &Path, reader: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;
        fs::create_dir_all(dir).await?;

        let partial = dir.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));
        let result: StorageResult<u64> = async {
            let mut file = fs::File::create(&partial).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to create file {}: {}",
                    partial.display(),
                    e
                ))
            })?;

            let bytes_copied = tokio::io::copy(reader, &mut file).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    partial.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to sync file {}: {}",
                    partial.display(),
                    e
                ))
            })?;

            fs::rename(&partial, path).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to move file into {}: {}",
                    path.display(),
                    e
                ))
            })?;

            Ok(bytes_copied)
        }
        .await;

        if result.is_err() {
            if let Err(e) = fs::remove_file(&partial).await {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        path = %partial.display(),
                        error = %e,
                        "Failed to remove partial file"
                    );
                }
            }
        }

        result
    }

    /// Entries of the bucket directory whose flattened name starts with the flattened
    /// prefix. A missing bucket directory has no entries.
    async fn matching_entries(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<fs::DirEntry>> {
        let dir = self.bucket_dir(bucket)?;
        let encoded_prefix = urlencoding::encode(prefix);

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::BackendError(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PARTIAL_PREFIX) {
                continue;
            }
            if name.starts_with(&*encoded_prefix) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn open_existing(&self, path: &Path, key: &str) -> StorageResult<fs::File> {
        fs::File::open(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::DownloadFailed(format!(
                "Failed to open file {}: {}",
                path.display(),
                e
            )),
        })
    }
}

#[async_trait]
impl Persistor for LocalPersistor {
    async fn send_stream(&self, bucket: &str, key: &str, mut reader: ByteReader) -> StorageResult<()> {
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        let size = self.write_atomic(&path, &mut reader).await?;

        tracing::info!(
            path = %path.display(),
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream upload successful"
        );

        Ok(())
    }

    async fn send_file(&self, bucket: &str, key: &str, source: &Path) -> StorageResult<()> {
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        let mut file = fs::File::open(source).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open file {}: {}", source.display(), e))
        })?;
        let size = self.write_atomic(&path, &mut file).await?;

        tracing::info!(
            path = %path.display(),
            source = %source.display(),
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage file upload successful"
        );

        Ok(())
    }

    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream> {
        check_range(range)?;
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        let mut file = self.open_existing(&path, key).await?;

        let reader: ByteReader = match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start)).await.map_err(|e| {
                    StorageError::DownloadFailed(format!(
                        "Failed to seek file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Box::pin(file.take(range.byte_count()))
            }
            None => Box::pin(file),
        };

        let key = key.to_string();
        let path_display = path.display().to_string();
        let stream = tokio_util::io::ReaderStream::new(reader).map(move |item| {
            item.map_err(|e| {
                tracing::error!(
                    path = %path_display,
                    key = %key,
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream download error"
                );
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()> {
        let from_path = self.key_to_path(bucket, from_key)?;
        let to_path = self.key_to_path(bucket, to_key)?;

        let mut source = self.open_existing(&from_path, from_key).await?;
        self.write_atomic(&to_path, &mut source).await?;

        tracing::info!(
            bucket = %bucket,
            from_key = %from_key,
            to_key = %to_key,
            from_path = %from_path.display(),
            to_path = %to_path.display(),
            "Local storage copy successful"
        );

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(bucket, key)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    path.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %path.display(),
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let entries = self.matching_entries(bucket, prefix).await?;

        if entries.is_empty() {
            tracing::debug!(bucket = %bucket, prefix = %prefix, "the directory is empty");
            return Ok(());
        }

        let count = entries.len();
        for entry in entries {
            let path = entry.path();
            let result = match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => fs::remove_dir_all(&path).await,
                _ => fs::remove_file(&path).await,
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::DeleteFailed(format!(
                        "Failed to delete {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        tracing::info!(
            bucket = %bucket,
            prefix = %prefix,
            count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage prefix delete successful"
        );

        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn directory_size(&self, bucket: &str, prefix: &str) -> StorageResult<u64> {
        let mut total_size: u64 = 0;
        for entry in self.matching_entries(bucket, prefix).await? {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?;
            if meta.is_file() {
                total_size += meta.len();
            }
        }

        tracing::debug!(bucket = %bucket, prefix = %prefix, total_size, "Local storage size computed");

        Ok(total_size)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
