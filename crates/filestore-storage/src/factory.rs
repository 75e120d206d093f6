#[cfg(feature = "storage-local")]
use crate::LocalPersistor;
#[cfg(feature = "storage-s3")]
use crate::ObjectStorePersistor;
use crate::{Persistor, StorageBackend, StorageError, StorageResult};
use filestore_core::Config;
use std::sync::Arc;

/// Create the configured persistor. Called once at startup; the result is shared by
/// every request.
pub async fn create_persistor(config: &Config) -> StorageResult<Arc<dyn Persistor>> {
    tracing::info!(backend = %config.storage_backend, "Loading backend");

    match config.storage_backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let region = config.s3_region.clone().ok_or_else(|| {
                StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
            })?;
            let persistor = ObjectStorePersistor::s3(region, config.s3_endpoint.clone());
            Ok(Arc::new(persistor))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let persistor = match config.local_storage_path {
                Some(ref base_path) => LocalPersistor::with_base_path(base_path).await?,
                None => LocalPersistor::new(),
            };
            Ok(Arc::new(persistor))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
