use async_trait::async_trait;
use filestore_core::{ByteRange, StorageBackend};
use filestore_processing::{
    FileConverter, ImageOptimiser, ProcessingError, ProcessingResult, StagedFile,
};
use filestore_storage::{ByteReader, ByteStream, Persistor, StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Writes `<label>:<original bytes>` next to the source and counts calls.
#[derive(Default)]
pub struct CountingConverter {
    calls: AtomicUsize,
}

impl CountingConverter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn render(&self, source: &Path, label: &str, ext: &str) -> ProcessingResult<StagedFile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dest = PathBuf::from(format!("{}.{}", source.display(), ext));
        let output = StagedFile::adopt(&dest);

        let original = tokio::fs::read(source)
            .await
            .map_err(|source| ProcessingError::Staging {
                path: dest.clone(),
                source,
            })?;
        let mut content = format!("{}:", label).into_bytes();
        content.extend_from_slice(&original);
        tokio::fs::write(&dest, content)
            .await
            .map_err(|source| ProcessingError::Staging { path: dest, source })?;
        Ok(output)
    }
}

#[async_trait]
impl FileConverter for CountingConverter {
    async fn convert(&self, source: &Path, format: &str) -> ProcessingResult<StagedFile> {
        self.render(source, format, format).await
    }

    async fn thumbnail(&self, source: &Path) -> ProcessingResult<StagedFile> {
        self.render(source, "thumbnail", "png").await
    }

    async fn preview(&self, source: &Path) -> ProcessingResult<StagedFile> {
        self.render(source, "preview", "png").await
    }
}

/// Writes a partial output, then fails like a crashing tool.
#[derive(Default)]
pub struct FailingConverter;

impl FailingConverter {
    async fn fail(&self, source: &Path) -> ProcessingResult<StagedFile> {
        let output = StagedFile::adopt(format!("{}.png", source.display()));
        let _ = tokio::fs::write(output.path(), b"partial").await;
        Err(ProcessingError::Failed {
            command: "convert".to_string(),
            code: 1,
            stderr: "convert: no decode delegate".to_string(),
        })
    }
}

#[async_trait]
impl FileConverter for FailingConverter {
    async fn convert(&self, source: &Path, _format: &str) -> ProcessingResult<StagedFile> {
        self.fail(source).await
    }

    async fn thumbnail(&self, source: &Path) -> ProcessingResult<StagedFile> {
        self.fail(source).await
    }

    async fn preview(&self, source: &Path) -> ProcessingResult<StagedFile> {
        self.fail(source).await
    }
}

/// Records the paths it was asked to optimise.
#[derive(Default)]
pub struct CountingOptimiser {
    paths: Mutex<Vec<PathBuf>>,
}

impl CountingOptimiser {
    pub fn calls(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageOptimiser for CountingOptimiser {
    async fn optimise(&self, path: &Path) -> ProcessingResult<()> {
        assert!(path.exists(), "optimiser called on missing file");
        self.paths.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Delegates to a real persistor, failing removals on demand and counting them.
pub struct FlakyPersistor {
    inner: Arc<dyn Persistor>,
    fail_delete: AtomicBool,
    fail_delete_prefix: AtomicBool,
    delete_calls: AtomicUsize,
    delete_prefix_calls: AtomicUsize,
}

impl FlakyPersistor {
    pub fn new(inner: Arc<dyn Persistor>) -> Self {
        Self {
            inner,
            fail_delete: AtomicBool::new(false),
            fail_delete_prefix: AtomicBool::new(false),
            delete_calls: AtomicUsize::new(0),
            delete_prefix_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete_prefix(&self, fail: bool) {
        self.fail_delete_prefix.store(fail, Ordering::SeqCst);
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn delete_prefix_calls(&self) -> usize {
        self.delete_prefix_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persistor for FlakyPersistor {
    async fn send_stream(&self, bucket: &str, key: &str, reader: ByteReader) -> StorageResult<()> {
        self.inner.send_stream(bucket, key, reader).await
    }

    async fn send_file(&self, bucket: &str, key: &str, source: &Path) -> StorageResult<()> {
        self.inner.send_file(bucket, key, source).await
    }

    async fn get_stream(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<ByteStream> {
        self.inner.get_stream(bucket, key, range).await
    }

    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()> {
        self.inner.copy(bucket, from_key, to_key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!("refusing to delete {}", key)));
        }
        self.inner.delete(bucket, key).await
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()> {
        self.delete_prefix_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_prefix.load(Ordering::SeqCst) {
            return Err(StorageError::DeleteFailed(format!("refusing to delete {}", prefix)));
        }
        self.inner.delete_prefix(bucket, prefix).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        self.inner.exists(bucket, key).await
    }

    async fn directory_size(&self, bucket: &str, prefix: &str) -> StorageResult<u64> {
        self.inner.directory_size(bucket, prefix).await
    }

    fn backend_type(&self) -> StorageBackend {
        self.inner.backend_type()
    }
}
