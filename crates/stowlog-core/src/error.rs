//! Error types for stowlog-core

use thiserror::Error;

/// Errors raised when a record cannot be accepted
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record message is empty")]
    EmptyMessage,

    #[error("Record message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}
