//! Error types for http-dl
//!
//! Errors are grouped the way callers observe them:
//! - task lookups and cancellations ([`Error::NotFound`], [`Error::CannotCancel`])
//! - persistence failures ([`DatabaseError`])
//! - failures of an active transfer ([`DownloadError`])
//! - file removal during `remove`/`remove_all` ([`Error::FileDeletion`])

use std::path::PathBuf;
use thiserror::Error;

use crate::types::TaskId;

/// Result type alias for http-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for http-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// No task record exists for the identifier
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task is finished (completed, failed, cancelled) or undefined and cannot be cancelled
    #[error(
        "cannot cancel task {0}: it is finished (completed, failed or cancelled) or undefined"
    )]
    CannotCancel(TaskId),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Failure of an active download
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Removing a downloaded file failed
    #[error("failed to delete file {path}: {source}")]
    FileDeletion {
        /// The file that could not be removed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored or supplied URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored row cannot be mapped back to a task record
    #[error("corrupt task record {id}: {reason}")]
    Corrupt {
        /// Identifier of the offending row
        id: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Failures of a single download attempt
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The request or response body stream failed
    #[error("transfer of {url} failed: {reason}")]
    Transfer {
        /// Requested URL
        url: String,
        /// Transport-level reason
        reason: String,
    },

    /// Writing the downloaded bytes to disk failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether this error is [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether this error is [`Error::CannotCancel`]
    pub fn is_cannot_cancel(&self) -> bool {
        matches!(self, Error::CannotCancel(_))
    }
}
