//! The local-first sync engine.
//!
//! Every mutation is committed to the local store before the call returns;
//! the remote side is reconciled afterwards by supervised background tasks
//! (see [`SyncEngine::wait_idle`]) and by sweeps of the orchestrator.

mod inflight;
mod pipeline;
mod reconcile;
mod refresh;

pub(crate) use pipeline::AttemptOutcome;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::{Database, RecordRepository};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, ErasedRecord, Record, RecordId, SyncStatus};
use crate::remote::{Connectivity, RemoteService};
use inflight::InFlight;
use reconcile::detach_referrers;

/// Store-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A record was written locally, by a mutation or by sync bookkeeping
    Upserted {
        kind: EntityKind,
        id: RecordId,
        status: SyncStatus,
    },
    /// A record left the store
    Removed { kind: EntityKind, id: RecordId },
    /// A provisional id was replaced by the server's id
    IdReconciled {
        kind: EntityKind,
        provisional: RecordId,
        canonical: RecordId,
    },
    /// The remote service refused our credentials
    AuthenticationRequired,
}

/// Handle to the sync engine; clones share the same state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    remote: Arc<dyn RemoteService>,
    clock: Arc<dyn Clock>,
    connectivity: Connectivity,
    config: EngineConfig,
    events: broadcast::Sender<SyncEvent>,
    in_flight: InFlight,
    tasks: Mutex<JoinSet<()>>,
}

impl SyncEngine {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteService>,
        clock: Arc<dyn Clock>,
        connectivity: Connectivity,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                remote,
                clock,
                connectivity,
                config,
                events,
                in_flight: InFlight::default(),
                tasks: Mutex::new(JoinSet::new()),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Receive store-change notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    fn emit_upserted(&self, record: &ErasedRecord) {
        self.emit(SyncEvent::Upserted {
            kind: record.kind,
            id: record.id.clone(),
            status: record.sync.status,
        });
    }

    /// Create a record locally under a provisional id and schedule its
    /// remote creation.
    pub async fn create<E: Entity>(&self, fields: E) -> Result<Record<E>> {
        fields.validate()?;
        let record = Record::new_local(fields, self.now());
        let erased = record.clone().into_erased()?;
        self.inner.db.write(|repo| repo.upsert(&erased))?;

        tracing::debug!("Created {} {}", E::KIND, record.id);
        self.emit_upserted(&erased);
        self.schedule(E::KIND, record.id.clone());
        Ok(record)
    }

    /// Apply `patch` to a visible record and schedule the remote update.
    ///
    /// A record whose creation is still outstanding stays `Pending`; its
    /// next create attempt carries the new fields.
    pub async fn update<E: Entity>(&self, id: &RecordId, patch: E::Patch) -> Result<Record<E>> {
        let now = self.now();
        let erased = self.inner.db.write(|repo| {
            let mut record = Record::<E>::from_erased(load_visible(repo, E::KIND, id)?)?;
            record.fields.apply_patch(patch);
            record.fields.validate()?;
            record.sync.mark_updated();
            record.touch(now);
            let erased = record.into_erased()?;
            repo.upsert(&erased)?;
            Ok(erased)
        })?;

        tracing::debug!("Updated {} {} ({})", E::KIND, erased.id, erased.sync.status);
        self.emit_upserted(&erased);
        self.schedule(E::KIND, erased.id.clone());
        Record::from_erased(erased)
    }

    /// Delete a visible record.
    ///
    /// A record the server never acknowledged is purged on the spot with no
    /// remote call. Anything else is hidden as `PendingDelete` until the
    /// remote delete succeeds.
    pub async fn delete<E: Entity>(&self, id: &RecordId) -> Result<()> {
        let now = self.now();
        let (record, purged, detached) = self.inner.db.write(|repo| {
            let mut record = load_visible(repo, E::KIND, id)?;
            if record.is_provisional() {
                repo.delete(E::KIND, &record.id)?;
                let detached = detach_referrers(repo, &record.id, now)?;
                return Ok((record, true, detached));
            }
            record.sync.mark_deleted();
            record.touch(now);
            repo.upsert(&record)?;
            Ok((record, false, Vec::new()))
        })?;

        if purged {
            tracing::debug!("Purged unsynced {} {}", E::KIND, record.id);
            self.emit(SyncEvent::Removed {
                kind: E::KIND,
                id: record.id,
            });
        } else {
            tracing::debug!("Deleted {} {} ({})", E::KIND, record.id, record.sync.status);
            self.emit_upserted(&record);
            self.schedule(E::KIND, record.id);
        }
        self.reschedule(detached);
        Ok(())
    }

    /// A visible record by id. Provisional ids keep working after the
    /// record has been reconciled.
    pub fn get<E: Entity>(&self, id: &RecordId) -> Result<Option<Record<E>>> {
        self.inner
            .db
            .read(|repo| locate(repo, E::KIND, id))?
            .filter(ErasedRecord::is_visible)
            .map(Record::from_erased)
            .transpose()
    }

    /// All visible records of a kind in presentation order
    pub fn list<E: Entity>(&self) -> Result<Vec<Record<E>>> {
        let records = self.inner.db.read(|repo| repo.list_visible(E::KIND))?;
        sorted_view(records)
    }

    /// Records with outstanding work the orchestrator will pick up
    pub fn pending_count(&self) -> Result<usize> {
        self.inner.db.read(|repo| {
            SyncStatus::RETRYABLE
                .iter()
                .try_fold(0, |total, status| {
                    Ok::<_, Error>(total + repo.count_by_status(*status)?)
                })
        })
    }

    /// Records that exhausted their retry budget
    pub fn failed_count(&self) -> Result<usize> {
        self.inner
            .db
            .read(|repo| repo.count_by_status(SyncStatus::Failed))
    }

    /// Every record that is not `Synced`, hidden deletes included
    pub fn unsynced(&self, kind: EntityKind) -> Result<Vec<ErasedRecord>> {
        self.inner
            .db
            .read(|repo| repo.query_by_status(kind, &SyncStatus::UNSYNCED))
    }

    /// Reconcile the record now unless a worker already holds it, in which
    /// case that worker runs again with fresh state.
    fn schedule(&self, kind: EntityKind, id: RecordId) {
        if self.inner.in_flight.mark_dirty(kind, &id) {
            tracing::debug!("{kind} {id} changed while in flight");
            return;
        }
        let engine = self.clone();
        let mut tasks = self.tasks();
        reap(&mut tasks);
        tasks.spawn(async move {
            if let Err(error) = engine.drive(kind, id.clone()).await {
                tracing::error!("Failed to reconcile {kind} {id}: {error}");
            }
        });
    }

    /// Announce and schedule records changed as a side effect of another
    /// record's write.
    fn reschedule(&self, records: Vec<ErasedRecord>) {
        for record in records {
            self.emit_upserted(&record);
            self.schedule(record.kind, record.id);
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Background reconciliation tasks still running
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks();
        reap(&mut tasks);
        tasks.len()
    }

    /// Wait until every background reconciliation task, including those
    /// spawned while waiting, has finished.
    pub async fn wait_idle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                return;
            }
            while let Some(joined) = batch.join_next().await {
                log_join(joined);
            }
        }
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        log_join(joined);
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(error) = joined {
        tracing::error!("Reconciliation task aborted: {error}");
    }
}

/// Look up a record by id, following an alias if the id was provisional
fn locate(
    repo: &impl RecordRepository,
    kind: EntityKind,
    id: &RecordId,
) -> Result<Option<ErasedRecord>> {
    if let Some(record) = repo.get(kind, id)? {
        return Ok(Some(record));
    }
    match repo.resolve_alias(kind, id)? {
        Some(canonical) => repo.get(kind, &canonical),
        None => Ok(None),
    }
}

fn load_visible(
    repo: &impl RecordRepository,
    kind: EntityKind,
    id: &RecordId,
) -> Result<ErasedRecord> {
    locate(repo, kind, id)?
        .filter(ErasedRecord::is_visible)
        .ok_or_else(|| Error::NotFound(format!("{kind} {id}")))
}

fn sorted_view<E: Entity>(records: Vec<ErasedRecord>) -> Result<Vec<Record<E>>> {
    let mut records = records
        .into_iter()
        .map(Record::from_erased)
        .collect::<Result<Vec<_>>>()?;
    records.sort_by(E::view_order);
    Ok(records)
}
