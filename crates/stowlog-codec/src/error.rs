//! Error types for stowlog-codec

use thiserror::Error;

/// Errors that can occur while producing frames or resolving parameters
///
/// Decoding never returns these: a frame that cannot be decoded is reported
/// as `None` so the caller can skip it and keep scanning.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Missing secure parameter: {0}")]
    MissingParam(String),

    #[error("Secure parameter resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
