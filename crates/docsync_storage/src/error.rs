//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The path cannot host a store (missing, or not a directory).
    #[error("invalid store path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Another process holds the store's lock file.
    #[error("store at {} is locked by another process", .0.display())]
    Locked(PathBuf),

    /// A read extends beyond the end of a log.
    #[error("read of {len} bytes at {offset} is past the end ({size} bytes)")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Current size.
        size: u64,
    },

    /// Persisted store metadata could not be parsed.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Create a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
