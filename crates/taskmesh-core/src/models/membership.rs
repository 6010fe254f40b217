//! List membership model

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, RecordId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Editor,
    Viewer,
}

/// A user's access to a shared list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMembership {
    pub list_id: RecordId,
    pub user_id: String,
    pub role: MemberRole,
}

impl ListMembership {
    pub fn new(list_id: RecordId, user_id: impl Into<String>, role: MemberRole) -> Self {
        Self {
            list_id,
            user_id: user_id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MembershipPatch {
    pub role: Option<MemberRole>,
}

impl Entity for ListMembership {
    const KIND: EntityKind = EntityKind::ListMembership;
    type Patch = MembershipPatch;

    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("membership needs a user id".into()));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: MembershipPatch) {
        if let Some(role) = patch.role {
            self.role = role;
        }
    }

    fn references(&self) -> Vec<RecordId> {
        vec![self.list_id.clone()]
    }

    fn rewrite_reference(&mut self, old: &RecordId, new: &RecordId) -> bool {
        if &self.list_id == old {
            self.list_id = new.clone();
            return true;
        }
        false
    }
}
