//! Replacing provisional ids with the server's ids

use chrono::{DateTime, Utc};

use super::{SyncEngine, SyncEvent};
use crate::db::RecordRepository;
use crate::error::{Error, Result};
use crate::models::{EntityKind, ErasedRecord, RecordId};

impl SyncEngine {
    /// Move the unsynced record at provisional id `old` to `new` as `Synced`
    /// and repoint every record that references `old`, all in one
    /// transaction.
    ///
    /// Referrers the server already knows become `PendingUpdate` so the
    /// corrected reference is sent; unsynced referrers are rescheduled with
    /// their new reference. Returns the number of rewritten referrers. Safe
    /// to repeat: a second call finds nothing left to rewrite.
    ///
    /// Fails with `InvalidInput` for canonical or locally deleted records and
    /// with `Busy` while a sync worker holds `old`.
    pub async fn reconcile(
        &self,
        kind: EntityKind,
        old: &RecordId,
        new: &RecordId,
    ) -> Result<usize> {
        if !old.is_provisional() {
            return Err(Error::InvalidInput(format!(
                "{kind} {old} already has a server id"
            )));
        }
        let Some(mut claim) = self.inner.in_flight.claim(kind, old) else {
            return Err(Error::Busy(format!("{kind} {old}")));
        };

        let now = self.now();
        let (record, referrers) = self.inner.db.write(|repo| {
            let record = match repo.get(kind, old)? {
                Some(record) if !record.is_visible() => {
                    return Err(Error::InvalidInput(format!(
                        "{kind} {old} was deleted locally"
                    )));
                }
                Some(mut record) => {
                    repo.delete(kind, old)?;
                    record.id = new.clone();
                    record.sync.mark_synced(now);
                    repo.upsert(&record)?;
                    repo.record_alias(kind, old, new, now)?;
                    Some(record)
                }
                None => None,
            };
            let referrers = rewrite_referrers(repo, old, new, now)?;
            Ok((record, referrers))
        })?;

        let changed_meanwhile = record.is_some()
            && claim.rename(new.clone())
            && claim.finish().is_some();
        let rewritten = referrers.len();
        self.announce_reconciled(old, record.as_ref(), referrers);
        if changed_meanwhile {
            self.schedule(kind, new.clone());
        }
        Ok(rewritten)
    }

    pub(super) fn announce_reconciled(
        &self,
        provisional: &RecordId,
        record: Option<&ErasedRecord>,
        referrers: Vec<ErasedRecord>,
    ) {
        if let Some(record) = record {
            tracing::info!(
                "Reconciled {} {provisional} as {} ({} referrers)",
                record.kind,
                record.id,
                referrers.len()
            );
            self.emit(SyncEvent::IdReconciled {
                kind: record.kind,
                provisional: provisional.clone(),
                canonical: record.id.clone(),
            });
            self.emit_upserted(record);
        }
        self.reschedule(referrers);
    }
}

/// Rewrite `old` to `new` in every referencing record and persist them.
pub(super) fn rewrite_referrers(
    repo: &impl RecordRepository,
    old: &RecordId,
    new: &RecordId,
    now: DateTime<Utc>,
) -> Result<Vec<ErasedRecord>> {
    let mut rewritten = Vec::new();
    for mut record in repo.query_referencing(old)? {
        let rewrite = record.kind.ops().rewrite_reference;
        if !rewrite(&mut record.fields, old, new)? {
            continue;
        }
        record.sync.mark_updated();
        record.touch(now);
        repo.upsert(&record)?;
        rewritten.push(record);
    }
    Ok(rewritten)
}

/// Remove the discarded record `id` from every referrer that can live
/// without it. Referrers that cannot are left for the pipeline to fail.
pub(super) fn detach_referrers(
    repo: &impl RecordRepository,
    id: &RecordId,
    now: DateTime<Utc>,
) -> Result<Vec<ErasedRecord>> {
    let mut detached = Vec::new();
    for mut record in repo.query_referencing(id)? {
        let drop_reference = record.kind.ops().drop_reference;
        if !drop_reference(&mut record.fields, id)? {
            continue;
        }
        record.sync.mark_updated();
        record.touch(now);
        repo.upsert(&record)?;
        detached.push(record);
    }
    Ok(detached)
}
