//! Error types for stowlog-storage
//!
//! This module defines the error types used throughout the storage crate.

use stowlog_codec::CodecError;
use stowlog_core::RecordError;
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// A log file could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file name does not encode a creation time
    #[error("Invalid log file name: {0}")]
    InvalidFileName(String),

    /// Configuration rejected by `validate`
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The log or cache directory is unusable
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Opening a new active file failed
    #[error("Rotation failed: {0}")]
    RotationFailed(String),

    /// Record rejected before encoding
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    /// Frame encoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Decode parameters could not be resolved
    #[error("Secure parameters unavailable: {0}")]
    MissingSecureParams(String),

    /// The scan was cancelled by its caller
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new RotationFailed error
    pub fn rotation(message: impl Into<String>) -> Self {
        Self::RotationFailed(message.into())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
