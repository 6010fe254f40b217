//! In-memory stand-in for the remote service.
//!
//! Behaves like an authoritative server (issues canonical ids, keeps the
//! latest copy of each record) and lets callers inject failures, hold calls
//! in flight, and inspect the calls it received.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{RemoteError, RemoteRecord, RemoteService};
use crate::merge::FetchScope;
use crate::models::{EntityKind, RecordId};

/// One request received by [`InMemoryRemote`]
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Create { kind: EntityKind, fields: Value },
    Update { kind: EntityKind, id: RecordId, fields: Value },
    Delete { kind: EntityKind, id: RecordId },
    FetchAll { kind: EntityKind },
}

#[derive(Default)]
struct RemoteState {
    records: BTreeMap<(EntityKind, RecordId), RemoteRecord>,
    next_id: u64,
    queued_failures: VecDeque<RemoteError>,
    persistent_failure: Option<RemoteError>,
    calls: Vec<RemoteCall>,
}

#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    gate: Arc<AsyncMutex<()>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call with `error`. Queued failures apply in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.state().queued_failures.push_back(error);
    }

    /// Fail every call with `error` until cleared with `None`.
    pub fn fail_always(&self, error: Option<RemoteError>) {
        self.state().persistent_failure = error;
    }

    /// Block every call after it is logged until the returned guard drops.
    pub async fn hold(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.gate).lock_owned().await
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Poll until at least `count` calls arrived or `timeout` elapsed.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.call_count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Server-side copy of a record
    pub fn get(&self, kind: EntityKind, id: &RecordId) -> Option<RemoteRecord> {
        self.state().records.get(&(kind, id.clone())).cloned()
    }

    /// Every server-side record of a kind
    pub fn records(&self, kind: EntityKind) -> Vec<RemoteRecord> {
        self.state()
            .records
            .iter()
            .filter(|((record_kind, _), _)| *record_kind == kind)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Add a record as if another client created it
    pub fn insert(&self, kind: EntityKind, fields: Value) -> RemoteRecord {
        let mut state = self.state();
        Self::store_new(&mut state, kind, fields)
    }

    /// Remove a record as if another client deleted it
    pub fn remove(&self, kind: EntityKind, id: &RecordId) -> bool {
        self.state().records.remove(&(kind, id.clone())).is_some()
    }

    fn store_new(state: &mut RemoteState, kind: EntityKind, fields: Value) -> RemoteRecord {
        state.next_id += 1;
        let record = RemoteRecord {
            id: RecordId::new(format!("{}-{}", kind.remote_path(), state.next_id)),
            fields,
            updated_at: Some(Utc::now()),
        };
        state
            .records
            .insert((kind, record.id.clone()), record.clone());
        record
    }

    /// Log the call, wait at the gate, then return any injected failure.
    async fn begin(&self, call: RemoteCall) -> Result<(), RemoteError> {
        self.state().calls.push(call);
        drop(self.gate.lock().await);

        let mut state = self.state();
        if let Some(error) = state.queued_failures.pop_front() {
            return Err(error);
        }
        state.persistent_failure.clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn create_entity(
        &self,
        kind: EntityKind,
        fields: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        self.begin(RemoteCall::Create {
            kind,
            fields: fields.clone(),
        })
        .await?;
        let mut state = self.state();
        Ok(Self::store_new(&mut state, kind, fields))
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        id: &RecordId,
        deltas: Value,
    ) -> Result<RemoteRecord, RemoteError> {
        self.begin(RemoteCall::Update {
            kind,
            id: id.clone(),
            fields: deltas.clone(),
        })
        .await?;
        let mut state = self.state();
        let record = state
            .records
            .get_mut(&(kind, id.clone()))
            .ok_or_else(|| RemoteError::NotFound(format!("{kind} {id}")))?;

        match (&mut record.fields, deltas) {
            (Value::Object(current), Value::Object(changes)) => current.extend(changes),
            (current, replacement) => *current = replacement,
        }
        record.updated_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn delete_entity(&self, kind: EntityKind, id: &RecordId) -> Result<(), RemoteError> {
        self.begin(RemoteCall::Delete {
            kind,
            id: id.clone(),
        })
        .await?;
        if self.remove(kind, id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("{kind} {id}")))
        }
    }

    async fn fetch_all(
        &self,
        kind: EntityKind,
        scope: &FetchScope,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.begin(RemoteCall::FetchAll { kind }).await?;
        let records = self.records(kind);
        Ok(match scope {
            FetchScope::All => records,
            FetchScope::Referencing(target) => records
                .into_iter()
                .filter(|record| {
                    (kind.ops().references)(&record.fields)
                        .is_ok_and(|refs| refs.contains(target))
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn create_issues_canonical_ids() {
        let remote = InMemoryRemote::new();
        let first = remote
            .create_entity(EntityKind::Task, json!({"title": "a"}))
            .await
            .unwrap();
        let second = remote
            .create_entity(EntityKind::Task, json!({"title": "b"}))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(!first.id.is_provisional());
        assert_eq!(remote.records(EntityKind::Task).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_failures_apply_once() {
        let remote = InMemoryRemote::new();
        remote.fail_next(RemoteError::Transient("timeout".into()));

        let failed = remote
            .create_entity(EntityKind::TaskList, json!({"name": "x"}))
            .await;
        assert_eq!(failed, Err(RemoteError::Transient("timeout".into())));

        let ok = remote
            .create_entity(EntityKind::TaskList, json!({"name": "x"}))
            .await;
        assert!(ok.is_ok());
        assert_eq!(remote.call_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_merges_fields_and_delete_reports_missing() {
        let remote = InMemoryRemote::new();
        let record = remote.insert(EntityKind::Task, json!({"title": "a", "priority": 1}));

        let updated = remote
            .update_entity(EntityKind::Task, &record.id, json!({"title": "b"}))
            .await
            .unwrap();
        assert_eq!(updated.fields, json!({"title": "b", "priority": 1}));

        remote
            .delete_entity(EntityKind::Task, &record.id)
            .await
            .unwrap();
        assert!(matches!(
            remote.delete_entity(EntityKind::Task, &record.id).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_scope_filters_by_reference() {
        let remote = InMemoryRemote::new();
        remote.insert(
            EntityKind::Comment,
            json!({"task_id": "t1", "author_id": "u", "content": "a"}),
        );
        remote.insert(
            EntityKind::Comment,
            json!({"task_id": "t2", "author_id": "u", "content": "b"}),
        );

        let scoped = remote
            .fetch_all(
                EntityKind::Comment,
                &FetchScope::Referencing(RecordId::new("t1")),
            )
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].fields["content"], "a");
    }
}
