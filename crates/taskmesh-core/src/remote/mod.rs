//! Collaborators the sync engine talks to: the remote service and the
//! connectivity signal.

mod connectivity;
mod http;
#[cfg(any(test, feature = "testing"))]
mod memory;
mod offline;

pub use connectivity::Connectivity;
pub use http::HttpRemoteService;
#[cfg(any(test, feature = "testing"))]
pub use memory::{InMemoryRemote, RemoteCall};
pub use offline::OfflineRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::merge::FetchScope;
use crate::models::{EntityKind, RecordId};

/// Failure reported by the remote service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Credentials missing or expired (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The server has no such record (404)
    #[error("Not found: {0}")]
    NotFound(String),
    /// Network failure, timeout, or 5xx
    #[error("Transient failure: {0}")]
    Transient(String),
    /// Semantic rejection (other 4xx)
    #[error("Rejected: {0}")]
    Rejected(String),
    /// A success status with a body that could not be read. The call may
    /// have taken effect, so it is not resent automatically.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Classify an HTTP status code that is not a success.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            408 | 429 => Self::Transient(message),
            400..=499 => Self::Rejected(message),
            _ => Self::Transient(message),
        }
    }

    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// A record as the server reports it, always under a canonical id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub fields: Value,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Authoritative backend exposing CRUD per entity kind
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn create_entity(
        &self,
        kind: EntityKind,
        fields: Value,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: &RecordId,
        deltas: Value,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn delete_entity(&self, kind: EntityKind, id: &RecordId) -> Result<(), RemoteError>;

    async fn fetch_all(
        &self,
        kind: EntityKind,
        scope: &FetchScope,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_error_classes() {
        assert!(RemoteError::from_status(401, "x").is_unauthorized());
        assert!(RemoteError::from_status(403, "x").is_unauthorized());
        assert_eq!(
            RemoteError::from_status(404, "gone"),
            RemoteError::NotFound("gone".into())
        );
        assert!(matches!(
            RemoteError::from_status(422, "bad"),
            RemoteError::Rejected(_)
        ));
        assert!(matches!(
            RemoteError::from_status(429, "slow down"),
            RemoteError::Transient(_)
        ));
        assert!(matches!(
            RemoteError::from_status(503, "down"),
            RemoteError::Transient(_)
        ));
    }
}
