//! Comment model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, RecordId};
use crate::error::{Error, Result};

/// A comment on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub task_id: RecordId,
    pub author_id: String,
    pub content: String,
}

impl Comment {
    pub fn new(task_id: RecordId, author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_id,
            author_id: author_id.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommentPatch {
    pub content: Option<String>,
}

impl Entity for Comment {
    const KIND: EntityKind = EntityKind::Comment;
    type Patch = CommentPatch;

    fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::InvalidInput("comment cannot be empty".into()));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: CommentPatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
    }

    fn references(&self) -> Vec<RecordId> {
        vec![self.task_id.clone()]
    }

    fn rewrite_reference(&mut self, old: &RecordId, new: &RecordId) -> bool {
        if &self.task_id == old {
            self.task_id = new.clone();
            return true;
        }
        false
    }
}
