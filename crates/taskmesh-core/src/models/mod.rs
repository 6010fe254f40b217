//! Data models for taskmesh

mod comment;
mod entity;
mod id;
mod membership;
mod record;
mod status;
mod task;
mod task_list;

pub use comment::{Comment, CommentPatch};
pub use entity::{Entity, EntityKind};
pub use id::{RecordId, PROVISIONAL_PREFIX};
pub use membership::{ListMembership, MemberRole, MembershipPatch};
pub use record::{ErasedRecord, Operation, Record};
pub use status::{SyncState, SyncStatus};
pub use task::{Task, TaskPatch};
pub use task_list::{TaskList, TaskListPatch};
