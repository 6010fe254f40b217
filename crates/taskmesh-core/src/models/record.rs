//! Records: domain fields plus sync metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Entity, EntityKind, RecordId, SyncState, SyncStatus};
use crate::error::{Error, Result};

/// A stored entity together with its sync metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<F> {
    pub kind: EntityKind,
    pub id: RecordId,
    pub fields: F,
    pub sync: SyncState,
    pub created_at: DateTime<Utc>,
    /// Advanced on every local mutation; orders views, not conflicts
    pub updated_at: DateTime<Utc>,
}

/// Storage form of a record, fields kept as JSON
pub type ErasedRecord = Record<Value>;

/// The remote call that reconciles a record's outstanding work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl<F> Record<F> {
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    pub const fn status(&self) -> SyncStatus {
        self.sync.status
    }

    /// Whether normal reads should show the record
    pub fn is_visible(&self) -> bool {
        !self.sync.is_deleted()
    }

    /// The remote call needed to reconcile this record, if any
    pub fn pending_operation(&self) -> Option<Operation> {
        if self.sync.status == SyncStatus::Synced {
            return None;
        }
        Some(match self.sync.intent() {
            SyncStatus::PendingDelete => Operation::Delete,
            _ if self.is_provisional() => Operation::Create,
            _ => Operation::Update,
        })
    }

    /// Advance `updated_at` for a local mutation, strictly past its previous
    /// value even when the clock has not moved.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + chrono::Duration::milliseconds(1);
        self.updated_at = now.max(floor);
    }
}

impl<E: Entity> Record<E> {
    /// A brand new local record under a provisional id
    pub fn new_local(fields: E, now: DateTime<Utc>) -> Self {
        Self {
            kind: E::KIND,
            id: RecordId::provisional(),
            fields,
            sync: SyncState::pending(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn into_erased(self) -> Result<ErasedRecord> {
        Ok(Record {
            kind: self.kind,
            id: self.id,
            fields: serde_json::to_value(&self.fields)?,
            sync: self.sync,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn from_erased(record: ErasedRecord) -> Result<Self> {
        if record.kind != E::KIND {
            return Err(Error::InvalidInput(format!(
                "expected a {} record, found {} {}",
                E::KIND,
                record.kind,
                record.id
            )));
        }
        Ok(Self {
            kind: record.kind,
            id: record.id,
            fields: serde_json::from_value(record.fields)?,
            sync: record.sync,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl ErasedRecord {
    /// Foreign ids held in this record's fields
    pub fn references(&self) -> Result<Vec<RecordId>> {
        (self.kind.ops().references)(&self.fields)
    }
}
