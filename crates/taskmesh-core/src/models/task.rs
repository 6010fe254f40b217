//! Task model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{Entity, EntityKind, Record, RecordId};
use crate::error::{Error, Result};

/// Highest accepted priority
const MAX_PRIORITY: u8 = 3;

/// A task, optionally filed under one or more lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// 0 (none) to 3 (urgent)
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub list_ids: Vec<RecordId>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            notes: None,
            due_at: None,
            priority: 0,
            completed: false,
            list_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_list(mut self, list_id: RecordId) -> Self {
        if !self.list_ids.contains(&list_id) {
            self.list_ids.push(list_id);
        }
        self
    }

    #[must_use]
    pub const fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Field changes for a task; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
    pub priority: Option<u8>,
    pub completed: Option<bool>,
    pub list_ids: Option<Vec<RecordId>>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            completed: Some(completed),
            ..Self::default()
        }
    }
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;
    type Patch = TaskPatch;

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("task title cannot be empty".into()));
        }
        if self.priority > MAX_PRIORITY {
            return Err(Error::InvalidInput(format!(
                "task priority must be between 0 and {MAX_PRIORITY}"
            )));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: TaskPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(due_at) = patch.due_at {
            self.due_at = due_at;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(list_ids) = patch.list_ids {
            self.list_ids = list_ids;
        }
    }

    fn references(&self) -> Vec<RecordId> {
        self.list_ids.clone()
    }

    fn rewrite_reference(&mut self, old: &RecordId, new: &RecordId) -> bool {
        let mut changed = false;
        for list_id in &mut self.list_ids {
            if list_id == old {
                *list_id = new.clone();
                changed = true;
            }
        }
        changed
    }

    fn drop_reference(&mut self, id: &RecordId) -> bool {
        let before = self.list_ids.len();
        self.list_ids.retain(|list_id| list_id != id);
        self.list_ids.len() != before
    }

    /// Open tasks first, then by due date (undated last), priority, recency.
    fn view_order(a: &Record<Self>, b: &Record<Self>) -> Ordering {
        a.fields
            .completed
            .cmp(&b.fields.completed)
            .then_with(|| match (a.fields.due_at, b.fields.due_at) {
                (Some(left), Some(right)) => left.cmp(&right),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| b.fields.priority.cmp(&a.fields.priority))
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    }
}
