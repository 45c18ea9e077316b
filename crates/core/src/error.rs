//! Error types for the database server
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for server operations
pub type StrataResult<T> = std::result::Result<T, StrataError>;

/// Error types for the database server
#[derive(Debug, Error)]
pub enum StrataError {
    /// I/O error (directory creation, file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Root path exists but is not a directory
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Handle was closed and can no longer be used
    #[error("Database '{0}' is closed")]
    DatabaseClosed(String),

    /// Handle was deleted and can no longer be used
    #[error("Database '{0}' has been deleted")]
    DatabaseDeleted(String),

    /// Backing file is locked by another handle or process
    #[error("Database at '{}' is already in use", .0.display())]
    DatabaseLocked(PathBuf),

    /// Backing file does not look like one of ours
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Work queue no longer accepts tasks
    #[error("Work queue has been shut down")]
    QueueShutDown,

    /// A queued task panicked before producing its result
    #[error("Queued task panicked: {0}")]
    TaskPanicked(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataError {
    /// Build a `Corruption` error
    pub fn corruption(msg: impl Into<String>) -> Self {
        StrataError::Corruption(msg.into())
    }

    /// Build a `Config` error
    pub fn config(msg: impl Into<String>) -> Self {
        StrataError::Config(msg.into())
    }

    /// True for errors that mean the handle is permanently unusable
    pub fn is_invalid_handle(&self) -> bool {
        matches!(
            self,
            StrataError::DatabaseClosed(_) | StrataError::DatabaseDeleted(_)
        )
    }
}
