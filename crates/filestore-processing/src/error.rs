use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from staging files and running conversion tools
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Invalid command {0:?}: contains dangerous characters")]
    InvalidCommand(String),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        stderr: String,
    },

    #[error("{command} failed with exit status {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{command} was terminated by signal {signal}")]
    Signalled {
        command: String,
        signal: i32,
        stderr: String,
    },

    #[error("Failed waiting for {command}: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Staging file {path} failed: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid format requested: {0}")]
    UnsupportedFormat(String),

    #[error("Conversion produced no output at {0}")]
    MissingOutput(PathBuf),
}

impl ProcessingError {
    /// Local disk failures, as opposed to failures of the external tool.
    pub fn is_staging(&self) -> bool {
        matches!(self, ProcessingError::Staging { .. })
    }
}

/// Result type for processing operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;
