//! Merging a full remote snapshot with locally pending work

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::models::{EntityKind, ErasedRecord, Record, RecordId, SyncState, SyncStatus};
use crate::remote::RemoteRecord;

/// Which slice of a kind's records a snapshot covers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchScope {
    /// Every record of the kind
    #[default]
    All,
    /// Only records referencing the given id (e.g. comments of one task)
    Referencing(RecordId),
}

impl FetchScope {
    /// Whether a local record falls inside this scope
    pub fn covers(&self, record: &ErasedRecord) -> bool {
        match self {
            Self::All => true,
            Self::Referencing(target) => record
                .references()
                .is_ok_and(|references| references.contains(target)),
        }
    }
}

/// What applying a snapshot changes locally
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Merged view of the scope, hidden records excluded, unordered
    pub view: Vec<ErasedRecord>,
    /// Records to write as `Synced`
    pub upserts: Vec<ErasedRecord>,
    /// Previously synced records the server no longer has
    pub removals: Vec<RecordId>,
}

/// Merge `remote` (the server's snapshot of `scope`, requested at
/// `fetched_at`) into `local` (every local record of `kind`).
///
/// Unsynced local records always win over a same-id remote record, so a
/// stale snapshot never overwrites pending work; pending deletes stay hidden
/// even if the server still lists them. Records only the server has are
/// added as `Synced`. Synced local records missing from the snapshot were
/// deleted by someone else and are dropped, unless they were synced after
/// the snapshot was requested.
pub fn merge_snapshot(
    kind: EntityKind,
    scope: &FetchScope,
    local: Vec<ErasedRecord>,
    remote: Vec<RemoteRecord>,
    fetched_at: DateTime<Utc>,
) -> MergePlan {
    let from_remote = kind.ops().from_remote_response;
    let mut present = HashSet::new();
    let mut incoming = BTreeMap::new();
    for record in remote {
        present.insert(record.id.clone());
        match from_remote(record.fields) {
            Ok(fields) => {
                incoming.insert(record.id, (fields, record.updated_at));
            }
            Err(error) => {
                tracing::warn!("Skipping malformed remote {kind} {}: {error}", record.id);
            }
        }
    }

    let mut plan = MergePlan::default();

    for record in local {
        if record.sync.status != SyncStatus::Synced || synced_since(&record, fetched_at) {
            incoming.remove(&record.id);
            if record.is_visible() && scope.covers(&record) {
                plan.view.push(record);
            }
            continue;
        }

        if let Some((fields, updated_at)) = incoming.remove(&record.id) {
            let merged = Record {
                fields,
                sync: SyncState::synced(fetched_at),
                updated_at: updated_at.unwrap_or(record.updated_at),
                ..record
            };
            plan.upserts.push(merged.clone());
            plan.view.push(merged);
        } else if present.contains(&record.id) || !scope.covers(&record) {
            if scope.covers(&record) {
                plan.view.push(record);
            }
        } else {
            plan.removals.push(record.id);
        }
    }

    for (id, (fields, updated_at)) in incoming {
        let updated_at = updated_at.unwrap_or(fetched_at);
        let record = Record {
            kind,
            id,
            fields,
            sync: SyncState::synced(fetched_at),
            created_at: updated_at,
            updated_at,
        };
        plan.upserts.push(record.clone());
        plan.view.push(record);
    }

    plan
}

/// Synced by this client after the snapshot was requested, so the snapshot
/// may predate it.
fn synced_since(record: &ErasedRecord, fetched_at: DateTime<Utc>) -> bool {
    record
        .sync
        .last_synced_at
        .is_some_and(|synced_at| synced_at >= fetched_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, Task};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn synced(id: &str, title: &str) -> ErasedRecord {
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let mut record = Record::new_local(Task::new(title), earlier)
            .into_erased()
            .unwrap();
        record.id = RecordId::new(id);
        record.sync = SyncState::synced(earlier);
        record
    }

    fn remote(id: &str, fields: serde_json::Value) -> RemoteRecord {
        RemoteRecord {
            id: RecordId::new(id),
            fields,
            updated_at: None,
        }
    }

    fn ids(records: &[ErasedRecord]) -> Vec<String> {
        let mut ids: Vec<_> = records.iter().map(|r| r.id.to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn pending_update_beats_stale_snapshot() {
        let mut local = synced("1", "x");
        local.fields["priority"] = json!(3);
        local.sync.mark_updated();

        let plan = merge_snapshot(
            EntityKind::Task,
            &FetchScope::All,
            vec![local],
            vec![remote("1", json!({"title": "x", "priority": 1}))],
            Utc::now(),
        );

        assert_eq!(plan.view.len(), 1);
        assert_eq!(plan.view[0].fields["priority"], 3);
        assert_eq!(plan.view[0].sync.status, SyncStatus::PendingUpdate);
        assert!(plan.upserts.is_empty());
    }

    #[test]
    fn pending_deletes_stay_hidden() {
        let mut first = synced("1", "a");
        first.sync.mark_deleted();
        let mut second = synced("2", "b");
        second.sync.mark_deleted();

        let plan = merge_snapshot(
            EntityKind::Task,
            &FetchScope::All,
            vec![first, second],
            vec![
                remote("1", json!({"title": "a"})),
                remote("2", json!({"title": "b"})),
                remote("3", json!({"title": "c"})),
            ],
            Utc::now(),
        );

        assert_eq!(ids(&plan.view), vec!["3"]);
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn remote_only_records_arrive_synced() {
        let now = Utc::now();
        let plan = merge_snapshot(
            EntityKind::Task,
            &FetchScope::All,
            Vec::new(),
            vec![remote("9", json!({"title": "from elsewhere"}))],
            now,
        );

        assert_eq!(plan.upserts.len(), 1);
        let record = &plan.upserts[0];
        assert_eq!(record.sync.status, SyncStatus::Synced);
        assert_eq!(record.sync.last_synced_at, Some(now));
        assert_eq!(record.fields["completed"], false);
    }

    #[test]
    fn synced_records_missing_upstream_are_dropped() {
        let local_pending = Record::new_local(Task::new("new"), Utc::now())
            .into_erased()
            .unwrap();
        let plan = merge_snapshot(
            EntityKind::Task,
            &FetchScope::All,
            vec![synced("1", "kept"), synced("2", "gone"), local_pending.clone()],
            vec![remote("1", json!({"title": "kept upstream"}))],
            Utc::now(),
        );

        assert_eq!(plan.removals, vec![RecordId::new("2")]);
        let mut expected = vec!["1".to_string(), local_pending.id.to_string()];
        expected.sort();
        assert_eq!(ids(&plan.view), expected);
        let kept = plan.view.iter().find(|r| r.id.as_str() == "1").unwrap();
        assert_eq!(kept.fields["title"], "kept upstream");
    }

    #[test]
    fn record_synced_after_fetch_survives_stale_snapshot() {
        let fetched_at = Utc::now();
        let mut fresh = synced("7", "just created");
        fresh.sync = SyncState::synced(fetched_at + chrono::Duration::seconds(1));

        let plan = merge_snapshot(
            EntityKind::Task,
            &FetchScope::All,
            vec![fresh],
            Vec::new(),
            fetched_at,
        );

        assert!(plan.removals.is_empty());
        assert_eq!(ids(&plan.view), vec!["7"]);
    }

    #[test]
    fn scoped_snapshot_leaves_other_records_alone() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::minutes(1);
        let mut on_t1 = Record::new_local(Comment::new(RecordId::new("t1"), "u", "a"), earlier)
            .into_erased()
            .unwrap();
        on_t1.id = RecordId::new("c1");
        on_t1.sync = SyncState::synced(earlier);
        let mut on_t2 = on_t1.clone();
        on_t2.id = RecordId::new("c2");
        on_t2.fields["task_id"] = json!("t2");

        let plan = merge_snapshot(
            EntityKind::Comment,
            &FetchScope::Referencing(RecordId::new("t1")),
            vec![on_t1, on_t2],
            Vec::new(),
            now,
        );

        assert_eq!(plan.removals, vec![RecordId::new("c1")]);
        assert!(plan.view.is_empty());
    }

    #[test]
    fn malformed_remote_record_does_not_drop_local_copy() {
        let plan = merge_snapshot(
            EntityKind::Task,
            &FetchScope::All,
            vec![synced("1", "local")],
            vec![remote("1", json!({"priority": "high"}))],
            Utc::now(),
        );

        assert!(plan.removals.is_empty());
        assert_eq!(ids(&plan.view), vec!["1"]);
        assert_eq!(plan.view[0].fields["title"], "local");
    }
}
