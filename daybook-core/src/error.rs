/*!
Error types for the daybook core engine.
*/

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the daybook core.
pub type Result<T> = std::result::Result<T, DaybookError>;

/// Errors that can occur during persistence and backup operations.
#[derive(Error, Debug)]
pub enum DaybookError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse/serialize errors
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Backup data that is neither compact nor canonical shaped
    #[error("unrecognized backup format: {0}")]
    UnrecognizedFormat(String),

    /// Entry validation failures
    #[error("validation error: {0}")]
    Validation(String),

    /// Payload larger than the applicable ceiling
    #[error("backup size {size} bytes exceeds the {limit} byte limit")]
    SizeExceeded { size: usize, limit: usize },

    /// Storage area errors
    #[error("storage error: {0}")]
    Storage(String),

    /// Remote drive failures, reported after retries are exhausted
    #[error("sync failed: {0}")]
    Sync(String),

    /// A background job reported a processing error
    #[error("background job failed: {0}")]
    Worker(String),

    /// The background context itself failed; all in-flight jobs were aborted
    #[error("background worker fault: {0}")]
    WorkerFault(String),

    /// No response from the background context within the allowed window
    #[error("background job timed out after {0:?}")]
    WorkerTimeout(Duration),
}

impl DaybookError {
    /// Create a new unrecognized format error
    pub fn unrecognized_format<S: Into<String>>(msg: S) -> Self {
        Self::UnrecognizedFormat(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new sync error
    pub fn sync<S: Into<String>>(msg: S) -> Self {
        Self::Sync(msg.into())
    }

    /// Create a new background fault error
    pub fn worker_fault<S: Into<String>>(msg: S) -> Self {
        Self::WorkerFault(msg.into())
    }
}
