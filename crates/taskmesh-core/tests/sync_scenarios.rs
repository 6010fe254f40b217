//! End-to-end sync scenarios against the in-memory remote

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use taskmesh_core::db::{Database, RecordRepository};
use taskmesh_core::merge::merge_snapshot;
use taskmesh_core::models::{MembershipPatch, TaskListPatch, TaskPatch};
use taskmesh_core::remote::{InMemoryRemote, RemoteCall};
use taskmesh_core::{
    Clock, Connectivity, EngineConfig, EntityKind, FetchScope, ListMembership, ManualClock,
    MemberRole, Record, RecordId, RemoteError, RemoteRecord, SyncEngine, SyncOrchestrator,
    SyncState, SyncStatus, Task, TaskList,
};
use tempfile::tempdir;

struct Client {
    engine: SyncEngine,
    remote: Arc<InMemoryRemote>,
    clock: Arc<ManualClock>,
}

fn client(db: Database, remote: Arc<InMemoryRemote>, online: bool) -> Client {
    let clock = Arc::new(ManualClock::default());
    let engine = SyncEngine::new(
        db,
        remote.clone(),
        clock.clone(),
        Connectivity::new(online),
        EngineConfig::default().without_auto_sweep(),
    )
    .unwrap();
    Client {
        engine,
        remote,
        clock,
    }
}

fn in_memory(online: bool) -> Client {
    client(
        Database::open_in_memory().unwrap(),
        Arc::new(InMemoryRemote::new()),
        online,
    )
}

fn on_disk(path: &Path, remote: Arc<InMemoryRemote>) -> Client {
    client(Database::open(path).unwrap(), remote, false)
}

fn stored(engine: &SyncEngine, kind: EntityKind, id: &RecordId) -> Option<taskmesh_core::ErasedRecord> {
    engine.database().read(|repo| repo.get(kind, id)).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_task_syncs_when_network_returns() {
    let c = in_memory(false);
    let list = c.engine.create(TaskList::new("Groceries")).await.unwrap();
    let task = c
        .engine
        .create(Task::new("Buy milk").in_list(list.id.clone()))
        .await
        .unwrap();
    let member = c
        .engine
        .create(ListMembership::new(list.id.clone(), "user-2", MemberRole::Editor))
        .await
        .unwrap();

    assert!(task.is_provisional());
    assert_eq!(task.status(), SyncStatus::Pending);
    assert_eq!(c.engine.list::<Task>().unwrap().len(), 1);

    let handle = SyncOrchestrator::spawn(c.engine.clone());
    c.engine.connectivity().set_available(true);
    assert!(c.remote.wait_for_calls(3, Duration::from_secs(5)).await);
    handle.shutdown().await;

    let list = c.engine.get::<TaskList>(&list.id).unwrap().unwrap();
    let task = c.engine.get::<Task>(&task.id).unwrap().unwrap();
    let member = c.engine.get::<ListMembership>(&member.id).unwrap().unwrap();
    assert!(!list.is_provisional());
    assert!(!task.is_provisional());
    assert_eq!(task.status(), SyncStatus::Synced);
    assert_eq!(task.fields.list_ids, vec![list.id.clone()]);
    assert_eq!(member.fields.list_id, list.id);

    let remote_task = c.remote.get(EntityKind::Task, &task.id).unwrap();
    assert_eq!(remote_task.fields["list_ids"], json!([list.id.as_str()]));
    assert_eq!(c.engine.pending_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rapid_edits_end_with_the_last_title() {
    let c = in_memory(true);
    let created = c.engine.create(Task::new("v0")).await.unwrap();
    c.engine.wait_idle().await;
    let id = c.engine.get::<Task>(&created.id).unwrap().unwrap().id;

    let gate = c.remote.hold().await;
    c.engine
        .update::<Task>(&id, TaskPatch::title("v1"))
        .await
        .unwrap();
    assert!(c.remote.wait_for_calls(2, Duration::from_secs(5)).await);
    c.engine
        .update::<Task>(&id, TaskPatch::title("v2"))
        .await
        .unwrap();
    assert_eq!(
        stored(&c.engine, EntityKind::Task, &id).unwrap().fields["title"],
        "v2"
    );
    drop(gate);
    c.engine.wait_idle().await;

    let updates: Vec<_> = c
        .remote
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            RemoteCall::Update { fields, .. } => Some(fields),
            _ => None,
        })
        .collect();
    assert!(updates.len() <= 2);
    assert_eq!(updates.last().unwrap()["title"], "v2");

    let task = c.engine.get::<Task>(&id).unwrap().unwrap();
    assert_eq!(task.fields.title, "v2");
    assert_eq!(task.status(), SyncStatus::Synced);
    assert_eq!(c.remote.get(EntityKind::Task, &id).unwrap().fields["title"], "v2");
}

#[tokio::test(flavor = "multi_thread")]
async fn eleven_failures_leave_the_record_failed_until_retried() {
    let c = in_memory(true);
    c.remote
        .fail_always(Some(RemoteError::Transient("connection reset".into())));
    let created = c.engine.create(Task::new("stubborn")).await.unwrap();
    c.engine.wait_idle().await;

    for _ in 0..10 {
        c.clock.advance(chrono::Duration::seconds(32));
        c.engine.sweep().await.unwrap();
    }
    let record = stored(&c.engine, EntityKind::Task, &created.id).unwrap();
    assert_eq!(record.sync.status, SyncStatus::Failed);
    assert_eq!(record.sync.attempts, 10);
    assert_eq!(
        record.sync.last_error.as_deref(),
        Some("Transient failure: connection reset")
    );
    assert_eq!(c.remote.call_count(), 10);
    assert_eq!(c.engine.failed_count().unwrap(), 1);

    c.remote.fail_always(None);
    let report = c.engine.retry_failed().await.unwrap();
    assert_eq!(report.synced, 1);
    let task = c.engine.get::<Task>(&created.id).unwrap().unwrap();
    assert_eq!(task.status(), SyncStatus::Synced);
    assert_eq!(c.engine.failed_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_keeps_pending_deletes_hidden() {
    let c = in_memory(true);
    let mut ids = Vec::new();
    for title in ["a", "b", "c"] {
        let task = c.engine.create(Task::new(title)).await.unwrap();
        ids.push(task.id);
    }
    c.engine.wait_idle().await;

    c.engine.connectivity().set_available(false);
    c.engine.delete::<Task>(&ids[0]).await.unwrap();
    c.engine.delete::<Task>(&ids[1]).await.unwrap();
    assert_eq!(c.remote.records(EntityKind::Task).len(), 3);

    c.clock.advance(chrono::Duration::seconds(1));
    let view = c.engine.refresh::<Task>(FetchScope::All).await.unwrap();
    let titles: Vec<_> = view.into_iter().map(|task| task.fields.title).collect();
    assert_eq!(titles, vec!["c"]);
    assert_eq!(c.engine.pending_count().unwrap(), 2);
}

#[test]
fn merge_keeps_the_pending_local_value() {
    let now = chrono::Utc::now();
    let mut local = Record::new_local(TaskList::new("Inbox"), now);
    local.id = RecordId::new("lists-9");
    local.sync = SyncState::synced(now);
    local.fields.position = 5;
    local.sync.mark_updated();

    let plan = merge_snapshot(
        EntityKind::TaskList,
        &FetchScope::All,
        vec![local.into_erased().unwrap()],
        vec![RemoteRecord {
            id: RecordId::new("lists-9"),
            fields: json!({"name": "Inbox", "position": 3}),
            updated_at: None,
        }],
        now,
    );

    assert_eq!(plan.view.len(), 1);
    assert_eq!(plan.view[0].fields["position"], 5);
    assert!(plan.upserts.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unsynced_delete_is_local_only() {
    let c = in_memory(true);
    c.engine.connectivity().set_available(false);
    let created = c.engine.create(Task::new("typo")).await.unwrap();
    c.engine.delete::<Task>(&created.id).await.unwrap();
    c.engine.connectivity().set_available(true);
    c.engine.sweep().await.unwrap();
    c.engine.wait_idle().await;

    assert!(stored(&c.engine, EntityKind::Task, &created.id).is_none());
    assert_eq!(c.remote.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn task_outlives_its_discarded_list() {
    let c = in_memory(false);
    let list = c.engine.create(TaskList::new("Maybe")).await.unwrap();
    let task = c
        .engine
        .create(Task::new("buy stamps").in_list(list.id.clone()))
        .await
        .unwrap();
    c.engine.delete::<TaskList>(&list.id).await.unwrap();
    c.engine.wait_idle().await;

    c.engine.connectivity().set_available(true);
    for _ in 0..3 {
        c.engine.sweep().await.unwrap();
        c.engine.wait_idle().await;
        c.clock.advance(chrono::Duration::minutes(1));
    }

    let task = c.engine.get::<Task>(&task.id).unwrap().unwrap();
    assert_eq!(task.status(), SyncStatus::Synced);
    assert!(task.fields.list_ids.is_empty());
    assert_eq!(c.remote.call_count(), 1);
    assert!(c.remote.records(EntityKind::TaskList).is_empty());
    assert_eq!(c.engine.pending_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_mutation_survives_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("taskmesh.db");
    let remote = Arc::new(InMemoryRemote::new());

    let (task_id, list_id, member_id) = {
        let c = on_disk(&path, remote.clone());
        let task = c.engine.create(Task::new("first")).await.unwrap();
        c.engine
            .update::<Task>(&task.id, TaskPatch::title("second"))
            .await
            .unwrap();
        c.engine
            .update::<Task>(&task.id, TaskPatch::completed(true))
            .await
            .unwrap();

        let list = c.engine.create(TaskList::new("Errands")).await.unwrap();
        c.engine
            .update::<TaskList>(
                &list.id,
                TaskListPatch {
                    position: Some(2),
                    ..TaskListPatch::default()
                },
            )
            .await
            .unwrap();

        let member = c
            .engine
            .create(ListMembership::new(list.id.clone(), "user-3", MemberRole::Viewer))
            .await
            .unwrap();
        c.engine
            .update::<ListMembership>(
                &member.id,
                MembershipPatch {
                    role: Some(MemberRole::Editor),
                },
            )
            .await
            .unwrap();
        c.engine.wait_idle().await;
        (task.id, list.id, member.id)
    };

    let c = on_disk(&path, remote.clone());
    let task = c.engine.get::<Task>(&task_id).unwrap().unwrap();
    assert_eq!(task.fields.title, "second");
    assert!(task.fields.completed);
    assert_eq!(task.status(), SyncStatus::Pending);
    let list = c.engine.get::<TaskList>(&list_id).unwrap().unwrap();
    assert_eq!(list.fields.position, 2);
    let member = c.engine.get::<ListMembership>(&member_id).unwrap().unwrap();
    assert_eq!(member.fields.role, MemberRole::Editor);
    assert_eq!(c.engine.pending_count().unwrap(), 3);

    c.engine.connectivity().set_available(true);
    c.engine.sweep().await.unwrap();
    c.engine.wait_idle().await;
    assert_eq!(c.engine.pending_count().unwrap(), 0);
    assert_eq!(remote.records(EntityKind::Task)[0].fields["title"], "second");
    let remote_member = &remote.records(EntityKind::ListMembership)[0];
    assert_eq!(
        remote_member.fields["list_id"],
        json!(c.engine.get::<TaskList>(&list_id).unwrap().unwrap().id.as_str())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_delete_survives_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("taskmesh.db");
    let remote = Arc::new(InMemoryRemote::new());
    let canonical = remote.insert(EntityKind::Task, json!({"title": "shared"})).id;

    {
        let c = on_disk(&path, remote.clone());
        c.engine.connectivity().set_available(true);
        c.engine.refresh::<Task>(FetchScope::All).await.unwrap();
        c.engine.connectivity().set_available(false);
        c.engine.delete::<Task>(&canonical).await.unwrap();
        c.engine.wait_idle().await;
    }

    let c = on_disk(&path, remote.clone());
    assert!(c.engine.get::<Task>(&canonical).unwrap().is_none());
    let record = stored(&c.engine, EntityKind::Task, &canonical).unwrap();
    assert_eq!(record.sync.status, SyncStatus::PendingDelete);

    c.engine.connectivity().set_available(true);
    c.engine.sweep().await.unwrap();
    assert!(remote.records(EntityKind::Task).is_empty());
    assert!(stored(&c.engine, EntityKind::Task, &canonical).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn clock_drives_backoff_not_wall_time() {
    let c = in_memory(true);
    c.remote
        .fail_next(RemoteError::Transient("timeout".into()));
    let created = c.engine.create(Task::new("x")).await.unwrap();
    c.engine.wait_idle().await;
    let failed_at = c.clock.now();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(c.engine.sweep().await.unwrap().attempted, 0);

    c.clock.set(failed_at + chrono::Duration::seconds(2));
    assert_eq!(c.engine.sweep().await.unwrap().synced, 1);
    assert!(c.engine.get::<Task>(&created.id).unwrap().is_some());
}
