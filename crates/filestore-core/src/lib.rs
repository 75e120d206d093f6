//! Filestore Core Library
//!
//! This crate provides the configuration, error types and key layout shared by the
//! storage, processing and handler crates.

pub mod config;
pub mod error;
pub mod keys;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Config, LogFormat, StoreBuckets};
pub use error::SpecError;
pub use keys::{
    converted_folder_key, derived_key, normalize_format, ConversionSpec, ConversionStyle, FileLocation,
    KeyBuilder, CONVERTED_CACHE_SUFFIX,
};
pub use storage_types::{ByteRange, StorageBackend};
