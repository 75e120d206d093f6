//! Collaborator traits for conversion tools.
//!
//! Conversions are disk-path-in, disk-path-out: the source is a staged file and the
//! result is a new staged file owned by the caller.

use crate::error::ProcessingResult;
use crate::staging::StagedFile;
use async_trait::async_trait;
use std::path::Path;

/// Produces derived renditions of a staged original.
#[async_trait]
pub trait FileConverter: Send + Sync {
    /// Convert `source` to `format`.
    async fn convert(&self, source: &Path, format: &str) -> ProcessingResult<StagedFile>;

    /// Small rendition of the first page.
    async fn thumbnail(&self, source: &Path) -> ProcessingResult<StagedFile>;

    /// Medium rendition of the first page.
    async fn preview(&self, source: &Path) -> ProcessingResult<StagedFile>;
}

/// Post-processes a converted file in place (e.g. lossless recompression).
#[async_trait]
pub trait ImageOptimiser: Send + Sync {
    async fn optimise(&self, path: &Path) -> ProcessingResult<()>;
}
