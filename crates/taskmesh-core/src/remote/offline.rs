//! Remote for installs with no server configured.

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteError, RemoteRecord, RemoteService};
use crate::merge::FetchScope;
use crate::models::{EntityKind, RecordId};

/// A `RemoteService` that is never reachable. Pair it with an offline
/// `Connectivity` so the engine keeps every change local without spending
/// retry budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

fn unreachable_remote() -> RemoteError {
    RemoteError::Transient("no remote service configured".into())
}

#[async_trait]
impl RemoteService for OfflineRemote {
    async fn create_entity(
        &self,
        _kind: EntityKind,
        _fields: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        Err(unreachable_remote())
    }

    async fn update_entity(
        &self,
        _kind: EntityKind,
        _id: &RecordId,
        _deltas: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        Err(unreachable_remote())
    }

    async fn delete_entity(&self, _kind: EntityKind, _id: &RecordId) -> Result<(), RemoteError> {
        Err(unreachable_remote())
    }

    async fn fetch_all(
        &self,
        _kind: EntityKind,
        _scope: &FetchScope,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        Err(unreachable_remote())
    }
}
