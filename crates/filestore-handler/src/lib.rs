//! Filestore Handler Library
//!
//! The file handler sits between request routing and storage: it stores and deletes
//! originals, serves them back with optional byte ranges, and produces converted
//! variants on demand, caching each one next to its original so it is converted only
//! once.

pub mod error;
pub mod handler;
pub mod telemetry;

// Re-export commonly used types
pub use error::{FileHandlerError, FileHandlerResult};
pub use handler::FileHandler;
pub use telemetry::init_telemetry;

pub use filestore_core::{ByteRange, Config, ConversionSpec, ConversionStyle};
pub use filestore_storage::{ByteReader, ByteStream, Persistor};
