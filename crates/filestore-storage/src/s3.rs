use crate::traits::{check_range, ByteReader, ByteStream, Persistor, StorageError, StorageResult};
use crate::{ByteRange, StorageBackend};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::memory::InMemory;
use object_store::path::{Path, PathPart};
use object_store::Error as ObjectStoreError;
use object_store::{GetOptions, GetRange, ObjectMeta, ObjectStore, ObjectStoreExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::RwLock;

type StoreBuilder = Arc<dyn Fn(&str) -> StorageResult<Arc<dyn ObjectStore>> + Send + Sync>;

/// Object store persistor (S3 and S3-compatible providers)
///
/// One client is built per bucket on first use and reused afterwards.
#[derive(Clone)]
pub struct ObjectStorePersistor {
    builder: StoreBuilder,
    stores: Arc<RwLock<HashMap<String, Arc<dyn ObjectStore>>>>,
    backend: StorageBackend,
}

impl ObjectStorePersistor {
    /// Create a new S3 persistor
    ///
    /// # Arguments
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub fn s3(region: String, endpoint_url: Option<String>) -> Self {
        let builder: StoreBuilder = Arc::new(move |bucket: &str| {
            // Credentials come from the environment; region and endpoint are explicit.
            let mut builder = AmazonS3Builder::from_env()
                .with_region(region.clone())
                .with_bucket_name(bucket);

            if let Some(ref endpoint) = endpoint_url {
                let allow_http = endpoint.starts_with("http://");
                builder = builder
                    .with_endpoint(endpoint.clone())
                    .with_allow_http(allow_http);
            }

            let store = builder
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?;
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        });

        Self::with_builder(builder)
    }

    /// In-process store with one empty bucket per name. Used by tests and local
    /// development.
    pub fn in_memory() -> Self {
        Self::with_builder(Arc::new(|_bucket: &str| {
            Ok(Arc::new(InMemory::new()) as Arc<dyn ObjectStore>)
        }))
    }

    fn with_builder(builder: StoreBuilder) -> Self {
        Self {
            builder,
            stores: Arc::new(RwLock::new(HashMap::new())),
            backend: StorageBackend::S3,
        }
    }

    async fn store(&self, bucket: &str) -> StorageResult<Arc<dyn ObjectStore>> {
        if let Some(store) = self.stores.read().await.get(bucket) {
            return Ok(Arc::clone(store));
        }

        let mut stores = self.stores.write().await;
        if let Some(store) = stores.get(bucket) {
            return Ok(Arc::clone(store));
        }
        let store = (self.builder)(bucket)?;
        stores.insert(bucket.to_string(), Arc::clone(&store));
        tracing::debug!(bucket = %bucket, "Object store client created");
        Ok(store)
    }

    /// Objects whose key starts with `prefix`.
    ///
    /// Listing is by path segment and locations are percent-encoded, so the complete
    /// segments of the prefix are listed as a directory and entries are filtered on
    /// the encoded form of the whole prefix.
    async fn list_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<ObjectMeta>> {
        let Some((root, encoded)) = encode_prefix(prefix) else {
            // No valid key can start with this prefix.
            return Ok(Vec::new());
        };
        let store = self.store(bucket).await?;

        let objects: Vec<ObjectMeta> = store
            .list(root.as_ref())
            .try_filter(|meta| futures::future::ready(meta.location.as_ref().starts_with(&encoded)))
            .try_collect()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    prefix = %prefix,
                    "something went wrong listing prefix in object store"
                );
                StorageError::BackendError(e.to_string())
            })?;

        Ok(objects)
    }

    async fn upload<R>(&self, bucket: &str, key: &str, reader: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let store = self.store(bucket).await?;
        let location = location(key)?;

        // Large bodies go out as multipart uploads; nothing is visible at the key
        // until shutdown completes.
        let mut writer = BufWriter::new(store, location);
        let copied = match tokio::io::copy(reader, &mut writer).await {
            Ok(copied) => writer.shutdown().await.map(|_| copied),
            Err(e) => Err(e),
        };

        match copied {
            Ok(size) => Ok(size),
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    tracing::warn!(
                        error = %abort_err,
                        bucket = %bucket,
                        key = %key,
                        "Failed to abort object store upload"
                    );
                }
                Err(StorageError::UploadFailed(e.to_string()))
            }
        }
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".."
}

/// Object location of `key`.
///
/// `Path` drops empty segments, so `a//b`, `a/b/` and `a/b` would share one object;
/// such keys are rejected, as are `.` and `..` segments.
fn location(key: &str) -> StorageResult<Path> {
    if !key.split('/').all(is_valid_segment) {
        return Err(StorageError::InvalidKey(format!(
            "Storage key {:?} has an empty or relative segment",
            key
        )));
    }
    Ok(Path::from(key))
}

/// Listing root and location-encoded form of a raw key prefix.
///
/// Segment encoding works byte by byte, so encoding the trailing partial segment
/// keeps prefixes prefixes. `.` and `..` are only escaped as whole segments, which
/// `location` never produces, so a partial `.` or `..` stays raw.
fn encode_prefix(prefix: &str) -> Option<(Option<Path>, String)> {
    let (dirs, partial) = match prefix.rsplit_once('/') {
        Some((dirs, partial)) => (dirs.split('/').collect::<Vec<_>>(), partial),
        None => (Vec::new(), prefix),
    };
    if !dirs.iter().all(|segment| is_valid_segment(segment)) {
        return None;
    }

    let root = (!dirs.is_empty()).then(|| Path::from_iter(dirs.iter().copied()));
    let mut encoded = match root {
        Some(ref root) => format!("{}/", root.as_ref()),
        None => String::new(),
    };
    if partial == "." || partial == ".." {
        encoded.push_str(partial);
    } else {
        encoded.push_str(PathPart::from(partial).as_ref());
    }
    Some((root, encoded))
}

#[async_trait]
impl Persistor for ObjectStorePersistor {
    async fn send_stream(&self, bucket: &str, key: &str, mut reader: ByteReader) -> StorageResult<()> {
        let start = std::time::Instant::now();

        let size = self.upload(bucket, key, &mut reader).await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 stream upload failed"
            );
            e
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 stream upload successful"
        );

        Ok(())
    }

    async fn send_file(&self, bucket: &str, key: &str, source: &std::path::Path) -> StorageResult<()> {
        let start = std::time::Instant::now();

        let mut file = tokio::fs::File::open(source).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to open file {}: {}", source.display(), e))
        })?;

        let size = self.upload(bucket, key, &mut file).await.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %bucket,
                key = %key,
                source = %source.display(),
                "S3 file upload failed"
            );
            e
        })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 file upload successful"
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
        let start = std::time::Instant::now();
        let store = self.store(bucket).await?;
        let location = location(key)?;

        let options = GetOptions {
            range: range.map(|r| GetRange::Bounded(r.start..r.end.saturating_add(1))),
            ..Default::default()
        };

        let result = store.get_opts(&location, options).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let bucket = bucket.to_string();
        let key = key.to_string();

        let stream = result.into_stream().map(move |res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::error!(
                    bucket = %bucket,
                    key = %key,
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream download error"
                );
                Err(StorageError::DownloadFailed(e.to_string()))
            }
        });

        Ok(Box::pin(stream))
    }

    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let store = self.store(bucket).await?;
        let from = location(from_key)?;
        let to = location(to_key)?;

        store.copy(&from, &to).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(from_key.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %bucket,
                    from_key = %from_key,
                    to_key = %to_key,
                    "something went wrong copying file in S3"
                );
                StorageError::BackendError(other.to_string())
            }
        })?;

        tracing::info!(
            bucket = %bucket,
            from_key = %from_key,
            to_key = %to_key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 copy successful"
        );

        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let store = self.store(bucket).await?;
        let location = location(key)?;

        match store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(StorageError::DeleteFailed(e.to_string()));
            }
        }

        tracing::info!(
            bucket = %bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let objects = self.list_prefix(bucket, prefix).await?;

        if objects.is_empty() {
            tracing::debug!(bucket = %bucket, prefix = %prefix, "the directory is empty");
            return Ok(());
        }

        let count = objects.len();
        let store = self.store(bucket).await?;
        let locations = stream::iter(
            objects
                .into_iter()
                .map(|meta| Ok::<_, ObjectStoreError>(meta.location)),
        )
        .boxed();

        // Batched into bulk delete requests by the client.
        store
            .delete_stream(locations)
            .try_collect::<Vec<Path>>()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    prefix = %prefix,
                    "something went wrong deleting directory in S3"
                );
                StorageError::DeleteFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %bucket,
            prefix = %prefix,
            count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 prefix delete successful"
        );

        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let store = self.store(bucket).await?;
        let location = location(key)?;
        match store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn directory_size(&self, bucket: &str, prefix: &str) -> StorageResult<u64> {
        let objects = self.list_prefix(bucket, prefix).await?;
        let total_size: u64 = objects.iter().map(|meta| meta.size).sum();

        tracing::debug!(
            bucket = %bucket,
            prefix = %prefix,
            objects = objects.len(),
            total_size,
            "S3 size computed"
        );

        Ok(total_size)
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend
    }
}

#[cfg(all(test, feature = "storage-s3"))]
mod tests {
    use super::*;

    fn reader(data: &[u8]) -> ByteReader {
        Box::pin(std::io::Cursor::new(data.to_vec()))
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut downloaded = Vec::new();
        while let Some(chunk_result) = stream.next().await {
            downloaded.extend_from_slice(&chunk_result.unwrap());
        }
        downloaded
    }

    #[tokio::test]
    async fn test_round_trip_and_exists() {
        let storage = ObjectStorePersistor::in_memory();

        assert!(!storage.exists("bucket", "p/f").await.unwrap());
        storage.send_stream("bucket", "p/f", reader(b"hello")).await.unwrap();
        assert!(storage.exists("bucket", "p/f").await.unwrap());

        let stream = storage.get_stream("bucket", "p/f", None).await.unwrap();
        assert_eq!(collect(stream).await, b"hello");

        // buckets are independent
        assert!(!storage.exists("other", "p/f").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let storage = ObjectStorePersistor::in_memory();

        let result = storage.get_stream("bucket", "missing", None).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));

        let result = storage.copy("bucket", "missing", "elsewhere").await;
        assert!(result.unwrap_err().is_not_found());

        storage.delete("bucket", "missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_ranged_read() {
        let storage = ObjectStorePersistor::in_memory();
        let data: Vec<u8> = (0..100u8).collect();
        storage.send_stream("bucket", "k", reader(&data)).await.unwrap();

        let stream = storage
            .get_stream("bucket", "k", Some(ByteRange::new(10, 19)))
            .await
            .unwrap();
        assert_eq!(collect(stream).await, &data[10..20]);
    }

    #[tokio::test]
    async fn test_send_file_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("upload");
        tokio::fs::write(&source, b"file body").await.unwrap();

        let storage = ObjectStorePersistor::in_memory();
        storage.send_file("bucket", "a/original", &source).await.unwrap();
        storage.copy("bucket", "a/original", "b/copy").await.unwrap();

        let stream = storage.get_stream("bucket", "b/copy", None).await.unwrap();
        assert_eq!(collect(stream).await, b"file body");
    }

    #[tokio::test]
    async fn test_delete_prefix_and_size() {
        let storage = ObjectStorePersistor::in_memory();

        assert_eq!(storage.directory_size("bucket", "proj/").await.unwrap(), 0);
        storage.delete_prefix("bucket", "proj/").await.unwrap();

        storage.send_stream("bucket", "proj/a", reader(&[1; 10])).await.unwrap();
        storage.send_stream("bucket", "proj/b", reader(&[1; 20])).await.unwrap();
        storage.send_stream("bucket", "proj/c", reader(&[1; 5])).await.unwrap();
        storage.send_stream("bucket", "project/d", reader(&[1; 7])).await.unwrap();

        assert_eq!(storage.directory_size("bucket", "proj/").await.unwrap(), 35);
        // raw prefixes match across segment boundaries
        assert_eq!(storage.directory_size("bucket", "proj").await.unwrap(), 42);

        storage.delete_prefix("bucket", "proj/").await.unwrap();
        assert_eq!(storage.directory_size("bucket", "proj/").await.unwrap(), 0);
        assert!(storage.exists("bucket", "project/d").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_ops_with_escaped_characters() {
        let storage = ObjectStorePersistor::in_memory();
        storage.send_stream("bucket", "project1/file~1", reader(&[1; 4])).await.unwrap();
        storage
            .send_stream("bucket", "project1/file~1-converted-cache/format-png", reader(&[1; 9]))
            .await
            .unwrap();
        storage.send_stream("bucket", "project1/file#2", reader(&[1; 3])).await.unwrap();

        assert_eq!(storage.directory_size("bucket", "project1/file~").await.unwrap(), 13);
        assert_eq!(
            storage
                .directory_size("bucket", "project1/file~1-converted-cache/")
                .await
                .unwrap(),
            9
        );

        storage
            .delete_prefix("bucket", "project1/file~1-converted-cache/")
            .await
            .unwrap();
        assert!(!storage
            .exists("bucket", "project1/file~1-converted-cache/format-png")
            .await
            .unwrap());
        assert!(storage.exists("bucket", "project1/file~1").await.unwrap());
        assert_eq!(storage.directory_size("bucket", "project1/").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_keys_with_empty_segments_rejected() {
        let storage = ObjectStorePersistor::in_memory();
        for key in ["a//b", "a/b/", "/a", "a/./b", "a/../b", ""] {
            let result = storage.send_stream("bucket", key, reader(b"x")).await;
            assert!(
                matches!(result, Err(StorageError::InvalidKey(_))),
                "key {:?} accepted",
                key
            );
        }

        storage.send_stream("bucket", "a/b", reader(b"x")).await.unwrap();
        assert!(matches!(
            storage.exists("bucket", "a//b").await,
            Err(StorageError::InvalidKey(_))
        ));
        // A prefix no valid key can have matches nothing.
        assert_eq!(storage.directory_size("bucket", "a//").await.unwrap(), 0);
    }

    #[test]
    fn test_encode_prefix() {
        let (root, encoded) = encode_prefix("p/file~1-converted-cache/").unwrap();
        assert_eq!(root.unwrap().as_ref(), "p/file%7E1-converted-cache");
        assert_eq!(encoded, "p/file%7E1-converted-cache/");

        let (root, encoded) = encode_prefix("proj").unwrap();
        assert!(root.is_none());
        assert_eq!(encoded, "proj");

        assert!(encode_prefix("a//b").is_none());
    }
}
