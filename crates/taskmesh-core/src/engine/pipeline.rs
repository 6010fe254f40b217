//! Remote reconciliation of a single record

use serde_json::Value;

use super::inflight::Claim;
use super::reconcile::{detach_referrers, rewrite_referrers};
use super::{locate, SyncEngine, SyncEvent};
use crate::config::RejectionPolicy;
use crate::db::RecordRepository;
use crate::error::Result;
use crate::models::{EntityKind, ErasedRecord, Operation, RecordId, SyncState, SyncStatus};
use crate::remote::{RemoteError, RemoteRecord};
use crate::retry::FailureOutcome;

/// What one pass over a record achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    /// The server confirmed; the record is `Synced` or gone
    Synced,
    /// The server confirmed, but the record changed meanwhile and goes out
    /// again
    Superseded,
    /// The remote call failed within the retry budget
    Retrying,
    /// The remote call failed and the record is now `Failed`
    Failed,
    /// Held back until a referenced record is created remotely
    Deferred,
    /// A referenced record is gone or failed, so waiting cannot help; the
    /// record is now `Failed`
    Stranded,
    /// Nothing sent: offline, backing off, already synced, or held by
    /// another worker
    Skipped,
}

impl AttemptOutcome {
    /// Whether the pass reached the remote service
    pub(crate) const fn made_call(self) -> bool {
        matches!(
            self,
            Self::Synced | Self::Superseded | Self::Retrying | Self::Failed
        )
    }
}

/// Where a record's provisional references stand
enum References {
    /// None left, or all repointed
    Ready,
    /// At least one target is still waiting for its own create
    Waiting,
    /// A target was discarded or gave up
    Broken(String),
}

/// What a provisional id currently leads to
enum Target {
    Stored(SyncStatus),
    Renamed(RecordId),
    Missing,
}

/// Look a provisional id up across every kind. Provisional ids are unique
/// UUIDs, so at most one kind can match.
fn find_target(repo: &impl RecordRepository, id: &RecordId) -> Result<Target> {
    for kind in EntityKind::ALL {
        if let Some(record) = repo.get(kind, id)? {
            return Ok(if record.is_visible() {
                Target::Stored(record.sync.status)
            } else {
                Target::Missing
            });
        }
        if let Some(canonical) = repo.resolve_alias(kind, id)? {
            return Ok(Target::Renamed(canonical));
        }
    }
    Ok(Target::Missing)
}

impl SyncEngine {
    /// Reconcile one record with the remote service, running extra passes
    /// while it keeps changing underneath.
    pub(crate) async fn drive(&self, kind: EntityKind, id: RecordId) -> Result<AttemptOutcome> {
        let id = self
            .inner
            .db
            .read(|repo| locate(repo, kind, &id))?
            .map_or(id, |record| record.id);
        let Some(mut claim) = self.inner.in_flight.claim(kind, &id) else {
            tracing::debug!("{kind} {id} already in flight");
            return Ok(AttemptOutcome::Skipped);
        };

        loop {
            let outcome = self.attempt(&mut claim).await?;
            if outcome == AttemptOutcome::Superseded && !claim.is_released() {
                continue;
            }
            match claim.finish() {
                Some(next) => claim = next,
                None => return Ok(outcome),
            }
        }
    }

    async fn attempt(&self, claim: &mut Claim) -> Result<AttemptOutcome> {
        let kind = claim.kind();
        let id = claim.id().clone();
        if !self.inner.connectivity.is_available() {
            tracing::debug!("Offline, leaving {kind} {id} for a later sweep");
            return Ok(AttemptOutcome::Skipped);
        }

        // Always build the payload from what is stored now
        let Some(mut record) = self.inner.db.read(|repo| repo.get(kind, &id))? else {
            return Ok(AttemptOutcome::Skipped);
        };
        let Some(operation) = record.pending_operation() else {
            return Ok(AttemptOutcome::Skipped);
        };
        if record.sync.status == SyncStatus::Failed {
            return Ok(AttemptOutcome::Skipped);
        }
        if !self.inner.config.retry.is_eligible(&record.sync, self.now()) {
            tracing::debug!("{kind} {id} is backing off");
            return Ok(AttemptOutcome::Skipped);
        }
        if operation == Operation::Delete && record.is_provisional() {
            self.purge(kind, &id)?;
            return Ok(AttemptOutcome::Synced);
        }
        if operation != Operation::Delete {
            match self.check_references(&mut record)? {
                References::Ready => {}
                References::Waiting => {
                    tracing::debug!("Deferring {kind} {id} until its references are created");
                    return Ok(AttemptOutcome::Deferred);
                }
                References::Broken(reason) => return self.strand(kind, &id, &reason),
            }
        }

        tracing::debug!(
            "Sending {operation:?} for {kind} {id} (attempt {})",
            record.sync.attempts + 1
        );
        let to_payload = kind.ops().to_remote_payload;
        let remote = &self.inner.remote;
        let outcome = match operation {
            Operation::Create => match remote.create_entity(kind, to_payload(&record.fields)?).await {
                Ok(created) => self.complete_create(claim, &record, created)?,
                Err(error) => self.record_failure(kind, &id, &error)?,
            },
            Operation::Update => {
                match remote
                    .update_entity(kind, &id, to_payload(&record.fields)?)
                    .await
                {
                    Ok(updated) => self.complete_update(&record, updated)?,
                    Err(error) => self.record_failure(kind, &id, &error)?,
                }
            }
            Operation::Delete => match remote.delete_entity(kind, &id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    self.purge(kind, &id)?;
                    AttemptOutcome::Synced
                }
                Err(error) => self.record_failure(kind, &id, &error)?,
            },
        };
        Ok(outcome)
    }

    /// The server created the record: move it to its canonical id and
    /// repoint everything that referenced the provisional one.
    fn complete_create(
        &self,
        claim: &mut Claim,
        sent: &ErasedRecord,
        created: RemoteRecord,
    ) -> Result<AttemptOutcome> {
        let kind = sent.kind;
        let provisional = &sent.id;
        let canonical = created.id;
        let server_fields = accept_fields(kind, created.fields);
        let now = self.now();

        let (record, referrers) = self.inner.db.write(|repo| {
            let record = match repo.get(kind, provisional)? {
                Some(mut current) if current.is_visible() => {
                    repo.delete(kind, provisional)?;
                    current.id = canonical.clone();
                    if current.updated_at == sent.updated_at {
                        if let Some(fields) = server_fields {
                            current.fields = fields;
                        }
                        current.sync.mark_synced(now);
                    } else {
                        current.sync.mark_superseded();
                    }
                    current
                }
                current => {
                    // Deleted locally while the create was in flight: the
                    // server copy has to go too.
                    if current.is_some() {
                        repo.delete(kind, provisional)?;
                    }
                    let mut tombstone = current.unwrap_or_else(|| sent.clone());
                    tombstone.id = canonical.clone();
                    tombstone.sync = SyncState::synced(now);
                    tombstone.sync.mark_deleted();
                    tombstone
                }
            };
            repo.upsert(&record)?;
            repo.record_alias(kind, provisional, &canonical, now)?;
            let referrers = rewrite_referrers(repo, provisional, &canonical, now)?;
            Ok((record, referrers))
        })?;

        if !claim.rename(record.id.clone()) {
            tracing::debug!("{kind} {} picked up by another worker", record.id);
        }
        self.announce_reconciled(provisional, Some(&record), referrers);

        Ok(match record.sync.status {
            SyncStatus::Synced => AttemptOutcome::Synced,
            _ => AttemptOutcome::Superseded,
        })
    }

    fn complete_update(&self, sent: &ErasedRecord, updated: RemoteRecord) -> Result<AttemptOutcome> {
        let kind = sent.kind;
        let server_fields = accept_fields(kind, updated.fields);
        let now = self.now();

        let record = self.inner.db.write(|repo| {
            let Some(mut current) = repo.get(kind, &sent.id)? else {
                return Ok(None);
            };
            if current.updated_at != sent.updated_at {
                if current.is_visible() {
                    current.sync.mark_superseded();
                    repo.upsert(&current)?;
                }
                return Ok(Some(current));
            }
            if let Some(fields) = server_fields {
                current.fields = fields;
            }
            current.sync.mark_synced(now);
            repo.upsert(&current)?;
            Ok(Some(current))
        })?;

        let Some(record) = record else {
            return Ok(AttemptOutcome::Skipped);
        };
        self.emit_upserted(&record);
        Ok(if record.sync.status == SyncStatus::Synced {
            tracing::debug!("Synced {kind} {}", record.id);
            AttemptOutcome::Synced
        } else {
            AttemptOutcome::Superseded
        })
    }

    /// Classify the provisional ids `record` points at. Ids whose record has
    /// been created since the reference was written are repointed in place.
    fn check_references(&self, record: &mut ErasedRecord) -> Result<References> {
        let provisional: Vec<_> = record
            .references()?
            .into_iter()
            .filter(RecordId::is_provisional)
            .collect();
        if provisional.is_empty() {
            return Ok(References::Ready);
        }

        let rewrite = record.kind.ops().rewrite_reference;
        let now = self.now();
        self.inner.db.write(|repo| {
            let mut state = References::Ready;
            let mut repointed = false;
            for reference in &provisional {
                match find_target(repo, reference)? {
                    Target::Missing => {
                        return Ok(References::Broken(format!(
                            "referenced record {reference} no longer exists"
                        )));
                    }
                    Target::Stored(SyncStatus::Failed) => {
                        state = References::Broken(format!(
                            "referenced record {reference} failed to sync"
                        ));
                    }
                    Target::Stored(_) => {
                        if matches!(state, References::Ready) {
                            state = References::Waiting;
                        }
                    }
                    Target::Renamed(canonical) => {
                        repointed |= rewrite(&mut record.fields, reference, &canonical)?;
                    }
                }
            }
            if repointed {
                record.touch(now);
                repo.upsert(record)?;
            }
            Ok(state)
        })
    }

    /// Give up on a record whose references can never be satisfied by
    /// waiting. A manual retry puts it back in line.
    fn strand(&self, kind: EntityKind, id: &RecordId, reason: &str) -> Result<AttemptOutcome> {
        let policy = &self.inner.config.retry;
        let now = self.now();
        let record = self.inner.db.write(|repo| {
            let Some(mut record) = repo.get(kind, id)? else {
                return Ok(None);
            };
            policy.record_failure(&mut record.sync, reason, now);
            policy.exhaust(&mut record.sync);
            repo.upsert(&record)?;
            Ok(Some(record))
        })?;

        let Some(record) = record else {
            return Ok(AttemptOutcome::Skipped);
        };
        tracing::warn!("Giving up on {kind} {id}: {reason}");
        self.emit_upserted(&record);
        Ok(AttemptOutcome::Stranded)
    }

    /// Retry bookkeeping for a failed call. Local state is never rolled back.
    fn record_failure(
        &self,
        kind: EntityKind,
        id: &RecordId,
        error: &RemoteError,
    ) -> Result<AttemptOutcome> {
        let policy = &self.inner.config.retry;
        // An unreadable success may have created the record; resending
        // could duplicate it.
        let give_up = matches!(error, RemoteError::InvalidResponse(_))
            || (self.inner.config.rejection_policy == RejectionPolicy::FailFast
                && matches!(error, RemoteError::Rejected(_)));
        let now = self.now();

        let record = self.inner.db.write(|repo| {
            let Some(mut record) = repo.get(kind, id)? else {
                return Ok(None);
            };
            let outcome = policy.record_failure(&mut record.sync, error.to_string(), now);
            if give_up && outcome == FailureOutcome::Retry {
                policy.exhaust(&mut record.sync);
            }
            repo.upsert(&record)?;
            Ok(Some(record))
        })?;

        if error.is_unauthorized() {
            self.emit(SyncEvent::AuthenticationRequired);
        }
        let Some(record) = record else {
            return Ok(AttemptOutcome::Skipped);
        };
        self.emit_upserted(&record);

        if record.sync.status == SyncStatus::Failed {
            tracing::warn!(
                "Giving up on {kind} {id} after {} attempts: {error}",
                record.sync.attempts
            );
            Ok(AttemptOutcome::Failed)
        } else {
            tracing::warn!(
                "Attempt {} for {kind} {id} failed: {error}",
                record.sync.attempts
            );
            Ok(AttemptOutcome::Retrying)
        }
    }

    fn purge(&self, kind: EntityKind, id: &RecordId) -> Result<()> {
        let now = self.now();
        let (removed, detached) = self.inner.db.write(|repo| {
            if !repo.delete(kind, id)? {
                return Ok((false, Vec::new()));
            }
            let detached = if id.is_provisional() {
                detach_referrers(repo, id, now)?
            } else {
                Vec::new()
            };
            Ok((true, detached))
        })?;

        if removed {
            tracing::debug!("Removed {kind} {id}");
            self.emit(SyncEvent::Removed {
                kind,
                id: id.clone(),
            });
        }
        self.reschedule(detached);
        Ok(())
    }
}

/// Server fields in local storage form, if they parse
fn accept_fields(kind: EntityKind, fields: Value) -> Option<Value> {
    match (kind.ops().from_remote_response)(fields) {
        Ok(fields) => Some(fields),
        Err(error) => {
            tracing::warn!("Keeping local fields, server sent a malformed {kind}: {error}");
            None
        }
    }
}
