//! Error types for taskmesh-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using taskmesh-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in taskmesh-core operations
///
/// Only errors from the local write phase of a mutation reach the caller.
/// Remote failures are recorded on the record itself and surfaced through
/// status queries.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error (lock poisoning, corrupt rows)
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote service error from a foreground call (e.g. a snapshot fetch)
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A sync worker holds the record; try again once it finishes
    #[error("Record is being synced: {0}")]
    Busy(String),

    /// The background sync loop is no longer running
    #[error("Sync orchestrator has stopped")]
    OrchestratorStopped,
}
