//! File handler: originals, derived variants and their cache.
//!
//! A derived variant is produced the first time it is requested and stored under
//! the original's converted-cache folder. Every later request for the same variant
//! is served straight from storage. Writing or deleting an original drops its whole
//! cache folder so no stale variant outlives the content it was derived from.
//!
//! Concurrent first requests for the same variant may each convert; the last store
//! wins and all of them serve an equivalent result.

use crate::error::{FileHandlerError, FileHandlerResult};
use filestore_core::{
    converted_folder_key, derived_key, ByteRange, Config, ConversionSpec, ConversionStyle,
    SpecError,
};
use filestore_processing::{
    FileConverter, ImageMagickConverter, ImageOptimiser, OptiPngOptimiser, StagedFile,
    StagingArea,
};
use filestore_storage::{create_persistor, ByteReader, ByteStream, Persistor};
use futures::TryStreamExt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};

pub struct FileHandler {
    persistor: Arc<dyn Persistor>,
    staging: StagingArea,
    converter: Arc<dyn FileConverter>,
    optimiser: Arc<dyn ImageOptimiser>,
}

impl FileHandler {
    pub fn new(
        persistor: Arc<dyn Persistor>,
        staging: StagingArea,
        converter: Arc<dyn FileConverter>,
        optimiser: Arc<dyn ImageOptimiser>,
    ) -> Self {
        Self {
            persistor,
            staging,
            converter,
            optimiser,
        }
    }

    /// Build the handler and its collaborators from configuration.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let persistor = create_persistor(config).await?;
        let staging = StagingArea::new(config.upload_folder.clone()).await?;
        let converter = ImageMagickConverter::from_config(config)?;
        let optimiser = OptiPngOptimiser::from_config(config)?;

        info!(
            environment = %config.environment,
            backend = %persistor.backend_type(),
            upload_folder = %config.upload_folder.display(),
            "File handler initialized"
        );

        Ok(Self::new(
            persistor,
            staging,
            Arc::new(converter),
            Arc::new(optimiser),
        ))
    }

    pub fn persistor(&self) -> &Arc<dyn Persistor> {
        &self.persistor
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Store an original, dropping every variant cached for the previous content.
    ///
    /// The cache is invalidated before the write: if invalidation fails the original
    /// is left untouched and the error is returned.
    #[instrument(skip(self, reader))]
    pub async fn insert_file(
        &self,
        bucket: &str,
        key: &str,
        reader: ByteReader,
    ) -> FileHandlerResult<()> {
        let folder = converted_folder_key(key);
        self.persistor
            .delete_prefix(bucket, &folder)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, &folder, e))?;
        self.persistor
            .send_stream(bucket, key, reader)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, key, e))?;

        info!("File inserted");
        Ok(())
    }

    /// Copy an original within a bucket. The destination's cache is dropped first.
    #[instrument(skip(self))]
    pub async fn copy_file(
        &self,
        bucket: &str,
        source_key: &str,
        dest_key: &str,
    ) -> FileHandlerResult<()> {
        let folder = converted_folder_key(dest_key);
        self.persistor
            .delete_prefix(bucket, &folder)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, &folder, e))?;
        self.persistor
            .copy(bucket, source_key, dest_key)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, source_key, e))?;

        info!("File copied");
        Ok(())
    }

    /// Delete an original together with all of its cached variants.
    ///
    /// Both removals are always attempted. If either fails the call fails; when
    /// both fail the error of the original is reported.
    #[instrument(skip(self))]
    pub async fn delete_file(&self, bucket: &str, key: &str) -> FileHandlerResult<()> {
        let folder = converted_folder_key(key);
        let (original, cache) = tokio::join!(
            self.persistor.delete(bucket, key),
            self.persistor.delete_prefix(bucket, &folder),
        );

        match (original, cache) {
            (Ok(()), Ok(())) => {
                info!("File deleted");
                Ok(())
            }
            (Err(e), cache) => {
                if let Err(cache_err) = cache {
                    warn!(error = %cache_err, folder = %folder, "Failed to delete converted cache");
                }
                Err(FileHandlerError::storage(bucket, key, e))
            }
            (Ok(()), Err(e)) => Err(FileHandlerError::storage(bucket, &folder, e)),
        }
    }

    /// Stream an original, or the variant described by `spec`.
    ///
    /// An empty spec serves the original. Otherwise the variant is served from the
    /// cache, converting and storing it first on a miss. `range` applies to whichever
    /// object is finally served.
    #[instrument(skip(self))]
    pub async fn get_file(
        &self,
        bucket: &str,
        key: &str,
        spec: &ConversionSpec,
        range: Option<ByteRange>,
    ) -> FileHandlerResult<ByteStream> {
        if spec.is_empty() {
            return self
                .persistor
                .get_stream(bucket, key, range)
                .await
                .map_err(|e| FileHandlerError::storage(bucket, key, e));
        }

        let derived = derived_key(key, spec)?;
        let cached = self
            .persistor
            .exists(bucket, &derived)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, &derived, e))?;

        if cached {
            debug!(derived = %derived, "Serving cached variant");
        } else {
            self.convert_and_cache(bucket, key, spec, &derived).await?;
        }

        self.persistor
            .get_stream(bucket, &derived, range)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, &derived, e))
    }

    /// Total size of every object under `prefix`.
    #[instrument(skip(self))]
    pub async fn get_directory_size(&self, bucket: &str, prefix: &str) -> FileHandlerResult<u64> {
        let size = self
            .persistor
            .directory_size(bucket, prefix)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to compute directory size");
                FileHandlerError::storage(bucket, prefix, e)
            })?;
        debug!(size, "Computed directory size");
        Ok(size)
    }

    async fn convert_and_cache(
        &self,
        bucket: &str,
        key: &str,
        spec: &ConversionSpec,
        derived: &str,
    ) -> FileHandlerResult<()> {
        // The whole original is staged regardless of the requested range.
        let stream = self
            .persistor
            .get_stream(bucket, key, None)
            .await
            .map_err(|e| FileHandlerError::storage(bucket, key, e))?;
        let mut reader = StreamReader::new(stream.map_err(io::Error::other));

        // Staged files are removed when these guards drop, on every path out.
        let original = self
            .staging
            .write_stream(&mut reader)
            .await
            .map_err(|e| FileHandlerError::processing(key, e))?;
        let converted = self.convert(key, original.path(), spec).await?;
        self.optimiser
            .optimise(converted.path())
            .await
            .map_err(|e| FileHandlerError::processing(key, e))?;

        self.persistor
            .send_file(bucket, derived, converted.path())
            .await
            .map_err(|e| FileHandlerError::storage(bucket, derived, e))?;

        info!(derived = %derived, "Cached converted variant");
        Ok(())
    }

    /// A requested format takes precedence over a style.
    async fn convert(
        &self,
        key: &str,
        source: &Path,
        spec: &ConversionSpec,
    ) -> FileHandlerResult<StagedFile> {
        let result = match (&spec.format, spec.style) {
            (Some(format), _) => self.converter.convert(source, format).await,
            (None, Some(ConversionStyle::Thumbnail)) => self.converter.thumbnail(source).await,
            (None, Some(ConversionStyle::Preview)) => self.converter.preview(source).await,
            (None, None) => return Err(SpecError::Empty.into()),
        };
        result.map_err(|e| FileHandlerError::processing(key, e))
    }
}
