//! Filestore Storage Library
//!
//! This crate provides the `Persistor` trait and its two backends: an object store
//! (S3 and compatible providers) and the local filesystem.
//!
//! # Buckets and keys
//!
//! Every operation takes a bucket and a key. On the object store the bucket is a
//! remote bucket and the key is the object path. On the filesystem the bucket is a
//! root directory and the key is flattened into a single file name inside it, so
//! hierarchical keys never create subdirectories.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_persistor;
pub use filestore_core::{ByteRange, StorageBackend};
#[cfg(feature = "storage-local")]
pub use local::LocalPersistor;
#[cfg(feature = "storage-s3")]
pub use s3::ObjectStorePersistor;
pub use traits::{ByteReader, ByteStream, Persistor, StorageError, StorageResult};
