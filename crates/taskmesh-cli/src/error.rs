use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] taskmesh_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No task title provided")]
    EmptyTitle,
    #[error("List name cannot be empty")]
    EmptyListName,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Invalid due date '{0}', expected RFC 3339 (e.g. 2026-11-02T09:00:00Z)")]
    InvalidDueDate(String),
    #[error("No {kind} found for id/prefix: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set TASKMESH_API_URL (and TASKMESH_API_TOKEN if the server requires one)."
    )]
    SyncNotConfigured,
}
