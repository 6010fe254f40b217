//! One reconciliation worker per record at a time

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::{EntityKind, RecordId};

type Key = (EntityKind, RecordId);

/// Records with a worker attached, each with a "changed while in flight"
/// flag.
#[derive(Debug, Clone, Default)]
pub(super) struct InFlight {
    entries: Arc<Mutex<HashMap<Key, bool>>>,
}

impl InFlight {
    fn entries(&self) -> MutexGuard<'_, HashMap<Key, bool>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the record for a worker. If another worker already holds it, ask
    /// that worker for another pass instead and return `None`.
    pub fn claim(&self, kind: EntityKind, id: &RecordId) -> Option<Claim> {
        let key = (kind, id.clone());
        match self.entries().entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = true;
                None
            }
            Entry::Vacant(entry) => {
                entry.insert(false);
                Some(Claim {
                    registry: self.clone(),
                    key,
                    released: false,
                })
            }
        }
    }

    /// Flag a held record as changed. Returns `false` when no worker holds it.
    pub fn mark_dirty(&self, kind: EntityKind, id: &RecordId) -> bool {
        self.entries()
            .get_mut(&(kind, id.clone()))
            .map(|dirty| *dirty = true)
            .is_some()
    }

    pub fn is_claimed(&self, kind: EntityKind, id: &RecordId) -> bool {
        self.entries().contains_key(&(kind, id.clone()))
    }
}

/// Exclusive right to reconcile one record. Released on drop.
#[derive(Debug)]
pub(super) struct Claim {
    registry: InFlight,
    key: Key,
    released: bool,
}

impl Claim {
    pub fn kind(&self) -> EntityKind {
        self.key.0
    }

    pub fn id(&self) -> &RecordId {
        &self.key.1
    }

    /// Lost to another worker during a rename
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// End a pass. Hands the claim back if the record changed during the
    /// pass, otherwise releases it.
    pub fn finish(mut self) -> Option<Self> {
        if self.released {
            return None;
        }
        let mut entries = self.registry.entries();
        if let Some(dirty) = entries.get_mut(&self.key) {
            if *dirty {
                *dirty = false;
                drop(entries);
                return Some(self);
            }
        }
        entries.remove(&self.key);
        drop(entries);
        self.released = true;
        None
    }

    /// Follow the record to its canonical id. Returns `false`, releasing the
    /// claim, if a worker already holds the new id; that worker gets any
    /// pending rerun.
    pub fn rename(&mut self, id: RecordId) -> bool {
        let mut entries = self.registry.entries();
        let dirty = entries.remove(&self.key).unwrap_or(false);
        let key = (self.key.0, id);
        if let Some(other) = entries.get_mut(&key) {
            *other = true;
            self.released = true;
            return false;
        }
        entries.insert(key.clone(), dirty);
        self.key = key;
        true
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.released {
            self.registry.entries().remove(&self.key);
        }
    }
}
