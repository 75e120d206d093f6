pub mod stubs;

use filestore_handler::{ByteReader, ByteStream, FileHandler, Persistor};
use filestore_processing::{FileConverter, StagingArea};
use filestore_storage::{LocalPersistor, ObjectStorePersistor};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stubs::{CountingConverter, CountingOptimiser};
use tempfile::TempDir;

pub const BUCKET: &str = "user_files";

/// Handler wired to stub conversion tools
pub struct TestApp {
    pub handler: FileHandler,
    pub persistor: Arc<dyn Persistor>,
    pub converter: Arc<CountingConverter>,
    pub optimiser: Arc<CountingOptimiser>,
    pub staging_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn staged_files(&self) -> usize {
        count_entries(&self.staging_dir).await
    }

    pub async fn insert(&self, key: &str, content: &[u8]) {
        self.handler
            .insert_file(BUCKET, key, reader(content))
            .await
            .unwrap();
    }
}

/// Handler over a local filesystem store in a temporary directory
pub async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let persistor = LocalPersistor::with_base_path(temp_dir.path().join("storage"))
        .await
        .unwrap();
    build_app(temp_dir, Arc::new(persistor), None).await
}

/// Handler over an in-memory object store
pub async fn setup_object_store_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    build_app(temp_dir, Arc::new(ObjectStorePersistor::in_memory()), None).await
}

/// Handler over a caller-provided persistor
pub async fn setup_app_with_persistor(persistor: Arc<dyn Persistor>) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    build_app(temp_dir, persistor, None).await
}

/// Handler whose converter always fails
pub async fn setup_failing_app(converter: Arc<dyn FileConverter>) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let persistor = LocalPersistor::with_base_path(temp_dir.path().join("storage"))
        .await
        .unwrap();
    build_app(temp_dir, Arc::new(persistor), Some(converter)).await
}

async fn build_app(
    temp_dir: TempDir,
    persistor: Arc<dyn Persistor>,
    converter_override: Option<Arc<dyn FileConverter>>,
) -> TestApp {
    let staging_dir = temp_dir.path().join("uploads");
    let staging = StagingArea::new(&staging_dir).await.unwrap();
    let converter = Arc::new(CountingConverter::default());
    let optimiser = Arc::new(CountingOptimiser::default());

    let handler = FileHandler::new(
        persistor.clone(),
        staging,
        converter_override.unwrap_or_else(|| converter.clone() as Arc<dyn FileConverter>),
        optimiser.clone(),
    );

    TestApp {
        handler,
        persistor,
        converter,
        optimiser,
        staging_dir,
        _temp_dir: temp_dir,
    }
}

pub fn reader(content: &[u8]) -> ByteReader {
    Box::pin(std::io::Cursor::new(content.to_vec()))
}

pub async fn read_all(stream: ByteStream) -> Vec<u8> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
        .unwrap()
}

pub async fn count_entries(dir: &Path) -> usize {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(dir).await.unwrap();
    while entries.next_entry().await.unwrap().is_some() {
        count += 1;
    }
    count
}
