//! Error types for conversion parameters and key resolution.

/// Errors raised while turning request parameters into keys.
///
/// These are caller errors: the request is malformed and retrying it unchanged
/// cannot succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("Conversion spec has neither a format nor a style")]
    Empty,

    #[error("Invalid conversion format: {0:?}")]
    InvalidFormat(String),

    #[error("Unknown conversion style: {0}")]
    UnknownStyle(String),

    #[error("Public files are not available")]
    PublicFilesUnavailable,
}
