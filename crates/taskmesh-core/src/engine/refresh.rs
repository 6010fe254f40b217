//! Pulling server snapshots into the local store

use super::{sorted_view, SyncEngine, SyncEvent};
use crate::db::RecordRepository;
use crate::error::Result;
use crate::merge::{merge_snapshot, FetchScope};
use crate::models::{Entity, Record};

impl SyncEngine {
    /// Fetch the server's records in `scope`, merge them with local pending
    /// work and return the merged view in presentation order.
    pub async fn refresh<E: Entity>(&self, scope: FetchScope) -> Result<Vec<Record<E>>> {
        let fetched_at = self.now();
        let remote = self.inner.remote.fetch_all(E::KIND, &scope).await?;
        let received = remote.len();

        let plan = self.inner.db.write(|repo| {
            let local = repo.list_all(E::KIND)?;
            let plan = merge_snapshot(E::KIND, &scope, local, remote, fetched_at);
            for record in &plan.upserts {
                repo.upsert(record)?;
            }
            for id in &plan.removals {
                repo.delete(E::KIND, id)?;
            }
            Ok(plan)
        })?;

        tracing::info!(
            "Refreshed {}: {received} remote, {} written, {} removed",
            E::KIND,
            plan.upserts.len(),
            plan.removals.len()
        );
        for record in &plan.upserts {
            self.emit_upserted(record);
        }
        for id in plan.removals {
            self.emit(SyncEvent::Removed {
                kind: E::KIND,
                id,
            });
        }
        sorted_view(plan.view)
    }
}
