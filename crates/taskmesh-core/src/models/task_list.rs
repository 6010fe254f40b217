//! Task list model

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{Entity, EntityKind, Record};
use crate::error::{Error, Result};

/// A named list that tasks are filed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    /// Manual sort position, lowest first
    #[serde(default)]
    pub position: i32,
}

impl TaskList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
            position: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskListPatch {
    pub name: Option<String>,
    pub color: Option<Option<String>>,
    pub position: Option<i32>,
}

impl Entity for TaskList {
    const KIND: EntityKind = EntityKind::TaskList;
    type Patch = TaskListPatch;

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("list name cannot be empty".into()));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: TaskListPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(color) = patch.color {
            self.color = color;
        }
        if let Some(position) = patch.position {
            self.position = position;
        }
    }

    fn view_order(a: &Record<Self>, b: &Record<Self>) -> Ordering {
        a.fields
            .position
            .cmp(&b.fields.position)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    }
}
