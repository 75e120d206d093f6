//! Local staging area for files handed to conversion tools.
//!
//! Staged files are owned by a [`StagedFile`] guard: dropping the guard removes the
//! file, so every exit path of a conversion (success, error, or cancellation of the
//! surrounding future) leaves the upload folder clean.

use crate::error::{ProcessingError, ProcessingResult};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory where originals are staged before conversion.
#[derive(Debug, Clone)]
pub struct StagingArea {
    upload_folder: PathBuf,
}

impl StagingArea {
    /// Create the staging area, creating the folder if needed.
    pub async fn new(upload_folder: impl Into<PathBuf>) -> ProcessingResult<Self> {
        let upload_folder = upload_folder.into();
        fs::create_dir_all(&upload_folder)
            .await
            .map_err(|source| ProcessingError::Staging {
                path: upload_folder.clone(),
                source,
            })?;
        Ok(Self { upload_folder })
    }

    pub fn upload_folder(&self) -> &Path {
        &self.upload_folder
    }

    /// Drain `reader` into a freshly named file in the upload folder.
    ///
    /// Resolves only once the bytes are flushed to disk. On any read or write
    /// failure the partial file is removed before the error is returned.
    pub async fn write_stream<R>(&self, reader: &mut R) -> ProcessingResult<StagedFile>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let staged = StagedFile::adopt(self.upload_folder.join(Uuid::new_v4().to_string()));
        let staging_error = |source: io::Error| ProcessingError::Staging {
            path: staged.path().to_path_buf(),
            source,
        };

        let mut file = fs::File::create(staged.path()).await.map_err(staging_error)?;
        let bytes = tokio::io::copy(reader, &mut file)
            .await
            .map_err(staging_error)?;
        file.flush().await.map_err(staging_error)?;
        file.sync_all().await.map_err(staging_error)?;

        debug!(path = %staged.path().display(), bytes, "Staged file written");
        Ok(staged)
    }

    /// Remove a staged file. Missing files and `None` are not errors.
    pub async fn delete(path: Option<&Path>) -> io::Result<()> {
        let Some(path) = path else {
            return Ok(());
        };
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Owning handle of a file in the staging area. The file is removed on drop.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /// Take ownership of `path`, which may not exist yet (e.g. a tool's output).
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        // Drop cannot await; removing a single file is quick enough to do inline.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed staged file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove staged file"
            ),
        }
    }
}
