//! Error types for the control center

use stowlog_core::StatusCode;
use thiserror::Error;

/// Errors surfaced by the control center
#[derive(Debug, Error)]
pub enum ControlError {
    /// Engine init reported a failing status
    #[error("Engine init failed: {0}")]
    Init(StatusCode),

    /// `quit` has been called; no further writes are accepted
    #[error("Control center has quit")]
    Quit,

    /// Writer queue full (only from `try_write`)
    #[error("Writer queue is full")]
    QueueFull,

    /// Writer context exited without a quit
    #[error("Writer context is gone")]
    WriterGone,

    /// Must be built inside a tokio runtime
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] stowlog_storage::StorageError),

    /// Upload task panicked or was aborted
    #[error("Upload task failed: {0}")]
    UploadTask(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Write status equivalent of a rejected submission
    pub fn write_status(&self) -> StatusCode {
        match self {
            Self::QueueFull => StatusCode::WriteFailQueueFull,
            Self::Quit | Self::WriterGone => StatusCode::WriteFailQuit,
            Self::Init(_) => StatusCode::WriteFailNoInit,
            _ => StatusCode::WriteFailIo,
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ControlError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ControlError::WriterGone
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ControlError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ControlError::WriterGone
    }
}

/// Result type alias for control operations
pub type ControlResult<T> = Result<T, ControlError>;
