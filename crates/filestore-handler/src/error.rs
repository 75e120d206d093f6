//! Errors surfaced by the file handler.
//!
//! Storage "not found" is lifted into its own variant so callers can answer 404
//! without inspecting backend errors.

use filestore_core::SpecError;
use filestore_processing::ProcessingError;
use filestore_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum FileHandlerError {
    #[error("File not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid conversion request: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("Format not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Storage error for {bucket}/{key}: {source}")]
    Storage {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Conversion of {key} failed: {source}")]
    Conversion {
        key: String,
        #[source]
        source: ProcessingError,
    },

    #[error("Staging error: {source}")]
    Staging {
        #[source]
        source: ProcessingError,
    },
}

impl FileHandlerError {
    pub(crate) fn storage(bucket: &str, key: &str, source: StorageError) -> Self {
        if source.is_not_found() {
            FileHandlerError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }
        } else {
            FileHandlerError::Storage {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            }
        }
    }

    pub(crate) fn processing(key: &str, source: ProcessingError) -> Self {
        match source {
            ProcessingError::UnsupportedFormat(format) => FileHandlerError::UnsupportedFormat(format),
            source if source.is_staging() => FileHandlerError::Staging { source },
            source => FileHandlerError::Conversion {
                key: key.to_string(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FileHandlerError::NotFound { .. })
    }

    /// HTTP status code to return
    pub fn http_status_code(&self) -> u16 {
        match self {
            FileHandlerError::NotFound { .. } => 404,
            FileHandlerError::InvalidSpec(_) | FileHandlerError::UnsupportedFormat(_) => 400,
            FileHandlerError::Storage {
                source: StorageError::InvalidKey(_),
                ..
            } => 400,
            FileHandlerError::Storage {
                source: StorageError::InvalidRange { .. },
                ..
            } => 416,
            FileHandlerError::Storage { .. }
            | FileHandlerError::Conversion { .. }
            | FileHandlerError::Staging { .. } => 500,
        }
    }

    /// Machine-readable error code (e.g., "NOT_FOUND")
    pub fn error_code(&self) -> &'static str {
        match self {
            FileHandlerError::NotFound { .. } => "NOT_FOUND",
            FileHandlerError::InvalidSpec(_) => "INVALID_SPEC",
            FileHandlerError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            FileHandlerError::Storage { .. } => "STORAGE_ERROR",
            FileHandlerError::Conversion { .. } => "CONVERSION_ERROR",
            FileHandlerError::Staging { .. } => "STAGING_ERROR",
        }
    }
}

pub type FileHandlerResult<T> = Result<T, FileHandlerError>;
