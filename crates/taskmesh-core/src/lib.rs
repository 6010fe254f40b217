//! taskmesh-core - Core library for taskmesh
//!
//! This crate contains the record models, the durable local store, and the
//! local-first sync engine shared by every taskmesh interface. Mutations are
//! written locally before any network attempt and reconciled with the remote
//! service in the background.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, RejectionPolicy};
pub use engine::{SyncEngine, SyncEvent};
pub use error::{Error, Result};
pub use merge::FetchScope;
pub use models::{
    Comment, Entity, EntityKind, ErasedRecord, ListMembership, MemberRole, Record, RecordId,
    SyncState, SyncStatus, Task, TaskList,
};
pub use orchestrator::{OrchestratorHandle, SweepReport, SyncOrchestrator};
pub use remote::{Connectivity, RemoteError, RemoteRecord, RemoteService};
pub use retry::RetryPolicy;
