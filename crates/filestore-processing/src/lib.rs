//! Filestore Processing Library
//!
//! This crate bridges streamed storage content and disk-based conversion tools: a
//! local staging area for temporary files, a guard that runs external commands under
//! a timeout, and the ImageMagick / optipng collaborators built on it.

pub mod converter;
pub mod error;
pub mod optimiser;
pub mod safe_exec;
pub mod staging;
pub mod traits;

// Re-export commonly used types
pub use converter::ImageMagickConverter;
pub use error::{ProcessingError, ProcessingResult};
pub use optimiser::OptiPngOptimiser;
pub use safe_exec::{safe_exec, ExecOptions, ExecOutput, KillSignal, MAX_CAPTURED_BYTES};
pub use staging::{StagedFile, StagingArea};
pub use traits::{FileConverter, ImageOptimiser};
