//! Entity kinds and the per-kind behavior the sync engine is generic over

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::{Comment, ListMembership, Record, RecordId, Task, TaskList};
use crate::error::{Error, Result};

/// The closed set of synchronized entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    TaskList,
    Task,
    ListMembership,
    Comment,
}

impl EntityKind {
    pub const ALL: [Self; 4] = [
        Self::TaskList,
        Self::Task,
        Self::ListMembership,
        Self::Comment,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskList => "task_list",
            Self::Task => "task",
            Self::ListMembership => "list_membership",
            Self::Comment => "comment",
        }
    }

    /// Local table holding records of this kind
    pub(crate) const fn table(self) -> &'static str {
        match self {
            Self::TaskList => "task_lists",
            Self::Task => "tasks",
            Self::ListMembership => "list_memberships",
            Self::Comment => "comments",
        }
    }

    /// Collection path segment on the remote service
    pub const fn remote_path(self) -> &'static str {
        match self {
            Self::TaskList => "lists",
            Self::Task => "tasks",
            Self::ListMembership => "memberships",
            Self::Comment => "comments",
        }
    }

    /// Sweep tier: kinds in a lower tier are referenced by kinds in a higher
    /// one, so their creations go out first.
    pub const fn tier(self) -> u8 {
        match self {
            Self::TaskList => 0,
            Self::Task | Self::ListMembership => 1,
            Self::Comment => 2,
        }
    }

    pub(crate) fn ops(self) -> KindOps {
        match self {
            Self::TaskList => KindOps::of::<TaskList>(),
            Self::Task => KindOps::of::<Task>(),
            Self::ListMembership => KindOps::of::<ListMembership>(),
            Self::Comment => KindOps::of::<Comment>(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity kind: {s}")))
    }
}

/// Domain fields of one entity kind.
///
/// The engine stores fields as JSON and only reaches into them through this
/// trait, so adding a kind means implementing it once.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Partial update applied by `SyncEngine::update`
    type Patch: Clone + fmt::Debug + Default + Send + Sync;

    /// Reject field values that must never be stored.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn apply_patch(&mut self, patch: Self::Patch);

    /// Ids of other records this one points at
    fn references(&self) -> Vec<RecordId> {
        Vec::new()
    }

    /// Replace every reference to `old` with `new`. Returns whether anything
    /// changed.
    fn rewrite_reference(&mut self, _old: &RecordId, _new: &RecordId) -> bool {
        false
    }

    /// Forget a reference whose record was discarded before reaching the
    /// server. Returns `false` when the record cannot exist without it.
    fn drop_reference(&mut self, _id: &RecordId) -> bool {
        false
    }

    fn to_remote_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_remote_response(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Presentation order for list views. Defaults to most recent first.
    fn view_order(a: &Record<Self>, b: &Record<Self>) -> Ordering {
        b.updated_at.cmp(&a.updated_at)
    }
}

/// Type-erased entry points into an `Entity` implementation, used where the
/// engine handles records of every kind at once.
#[derive(Clone, Copy)]
pub(crate) struct KindOps {
    pub references: fn(&Value) -> Result<Vec<RecordId>>,
    pub rewrite_reference: fn(&mut Value, &RecordId, &RecordId) -> Result<bool>,
    pub drop_reference: fn(&mut Value, &RecordId) -> Result<bool>,
    pub to_remote_payload: fn(&Value) -> Result<Value>,
    pub from_remote_response: fn(Value) -> Result<Value>,
}

impl KindOps {
    fn of<E: Entity>() -> Self {
        Self {
            references: references_of::<E>,
            rewrite_reference: rewrite_reference_of::<E>,
            drop_reference: drop_reference_of::<E>,
            to_remote_payload: to_remote_payload_of::<E>,
            from_remote_response: from_remote_response_of::<E>,
        }
    }
}

fn decode<E: Entity>(fields: &Value) -> Result<E> {
    Ok(E::deserialize(fields)?)
}

fn references_of<E: Entity>(fields: &Value) -> Result<Vec<RecordId>> {
    Ok(decode::<E>(fields)?.references())
}

fn rewrite_reference_of<E: Entity>(
    fields: &mut Value,
    old: &RecordId,
    new: &RecordId,
) -> Result<bool> {
    let mut entity = decode::<E>(fields)?;
    if !entity.rewrite_reference(old, new) {
        return Ok(false);
    }
    *fields = serde_json::to_value(&entity)?;
    Ok(true)
}

fn drop_reference_of<E: Entity>(fields: &mut Value, id: &RecordId) -> Result<bool> {
    let mut entity = decode::<E>(fields)?;
    if !entity.drop_reference(id) {
        return Ok(false);
    }
    *fields = serde_json::to_value(&entity)?;
    Ok(true)
}

fn to_remote_payload_of<E: Entity>(fields: &Value) -> Result<Value> {
    decode::<E>(fields)?.to_remote_payload()
}

fn from_remote_response_of<E: Entity>(value: Value) -> Result<Value> {
    let entity = E::from_remote_response(value)?;
    Ok(serde_json::to_value(&entity)?)
}
