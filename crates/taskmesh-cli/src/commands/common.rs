use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use taskmesh_core::db::Database;
use taskmesh_core::remote::{HttpRemoteService, OfflineRemote};
use taskmesh_core::util::normalize_text_option;
use taskmesh_core::{
    Connectivity, EngineConfig, Entity, EntityKind, ErasedRecord, Record, RecordId, RemoteService,
    SyncEngine, SyncStatus, SystemClock, Task, TaskList,
};

use crate::error::CliError;

pub const API_URL_ENV: &str = "TASKMESH_API_URL";
pub const API_TOKEN_ENV: &str = "TASKMESH_API_TOKEN";
pub const CONFIG_ENV: &str = "TASKMESH_CONFIG";
pub const DB_PATH_ENV: &str = "TASKMESH_DB_PATH";

/// An opened local store plus the engine driving it
pub struct Session {
    pub engine: SyncEngine,
    sync_enabled: bool,
}

impl Session {
    pub const fn is_sync_enabled(&self) -> bool {
        self.sync_enabled
    }

    /// Let background sync of this run's mutations finish before exiting.
    pub async fn finish(self) {
        self.engine.wait_idle().await;
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListItem {
    pub id: String,
    pub title: String,
    pub notes: Option<String>,
    pub due_at: Option<String>,
    pub priority: u8,
    pub completed: bool,
    pub list_ids: Vec<String>,
    pub sync_status: String,
    pub updated_at: String,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub position: i32,
    pub sync_status: String,
}

#[derive(Debug, Serialize)]
pub struct UnsyncedItem {
    pub kind: String,
    pub id: String,
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub fn open_session(path: &Path, offline: bool) -> Result<Session, CliError> {
    let config = load_engine_config()?;
    let db = Database::open(path)?;

    let remote = if offline { None } else { remote_from_env()? };
    let sync_enabled = remote.is_some();
    let (remote, connectivity): (Arc<dyn RemoteService>, Connectivity) = match remote {
        Some(remote) => (Arc::new(remote), Connectivity::online()),
        None => {
            tracing::debug!("No remote configured, changes stay local");
            (Arc::new(OfflineRemote), Connectivity::offline())
        }
    };

    let engine = SyncEngine::new(db, remote, Arc::new(SystemClock), connectivity, config)?;
    Ok(Session {
        engine,
        sync_enabled,
    })
}

fn remote_from_env() -> Result<Option<HttpRemoteService>, CliError> {
    let Some(base_url) = normalize_text_option(env::var(API_URL_ENV).ok()) else {
        return Ok(None);
    };
    let token = normalize_text_option(env::var(API_TOKEN_ENV).ok());
    tracing::info!("Sync enabled with {base_url}");
    Ok(Some(HttpRemoteService::new(base_url, token)?))
}

fn load_engine_config() -> Result<EngineConfig, CliError> {
    match env::var_os(CONFIG_ENV) {
        Some(path) => EngineConfig::load(PathBuf::from(path))
            .map_err(|error| CliError::Config(format!("{CONFIG_ENV}: {error}"))),
        None => Ok(EngineConfig::default()),
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("taskmesh").join("taskmesh.db"))
        .ok_or_else(|| {
            CliError::Config("could not determine the user data directory; pass --db-path".into())
        })
}

pub fn normalize_title(parts: &[String]) -> Option<String> {
    normalize_text_option(Some(parts.join(" ")))
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    normalize_text_option(Some(id.to_string())).ok_or(CliError::EmptyId)
}

pub fn parse_due(value: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|due| due.with_timezone(&Utc))
        .map_err(|_| CliError::InvalidDueDate(value.to_string()))
}

/// Find a visible record by full id (provisional ids included) or by a
/// unique id prefix.
pub fn resolve_record<E: Entity>(engine: &SyncEngine, id: &str) -> Result<Record<E>, CliError> {
    let id = normalize_identifier(id)?;
    if let Some(record) = engine.get::<E>(&RecordId::new(id.clone()))? {
        return Ok(record);
    }

    let mut matches: Vec<_> = engine
        .list::<E>()?
        .into_iter()
        .filter(|record| record.id.as_str().starts_with(&id))
        .collect();
    match matches.len() {
        0 => Err(CliError::NotFound {
            kind: E::KIND.as_str(),
            id,
        }),
        1 => Ok(matches.remove(0)),
        count => Err(CliError::AmbiguousId(format!(
            "ID prefix '{id}' matches {count} {} records; use a longer prefix",
            E::KIND
        ))),
    }
}

pub fn status_marker(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Synced => "",
        SyncStatus::Pending | SyncStatus::PendingUpdate | SyncStatus::PendingDelete => " *",
        SyncStatus::Failed => " !",
    }
}

pub fn format_task_lines(tasks: &[Record<Task>], now: DateTime<Utc>) -> Vec<String> {
    tasks
        .iter()
        .map(|task| {
            let check = if task.fields.completed { "x" } else { " " };
            let due = task
                .fields
                .due_at
                .map(|due| format!("  due {}", due.format("%Y-%m-%d %H:%M")))
                .unwrap_or_default();
            let priority = "!".repeat(usize::from(task.fields.priority));
            format!(
                "{}  [{check}] {}{}{due}  ({}){}",
                task.id,
                task.fields.title,
                if priority.is_empty() {
                    String::new()
                } else {
                    format!(" {priority}")
                },
                format_relative_time(task.updated_at, now),
                status_marker(task.status())
            )
        })
        .collect()
}

pub fn task_to_list_item(task: &Record<Task>, now: DateTime<Utc>) -> TaskListItem {
    TaskListItem {
        id: task.id.to_string(),
        title: task.fields.title.clone(),
        notes: task.fields.notes.clone(),
        due_at: task.fields.due_at.map(|due| due.to_rfc3339()),
        priority: task.fields.priority,
        completed: task.fields.completed,
        list_ids: task.fields.list_ids.iter().map(ToString::to_string).collect(),
        sync_status: task.status().to_string(),
        updated_at: task.updated_at.to_rfc3339(),
        relative_time: format_relative_time(task.updated_at, now),
    }
}

pub fn list_to_item(list: &Record<TaskList>) -> ListItem {
    ListItem {
        id: list.id.to_string(),
        name: list.fields.name.clone(),
        color: list.fields.color.clone(),
        position: list.fields.position,
        sync_status: list.status().to_string(),
    }
}

pub fn unsynced_to_item(record: &ErasedRecord) -> UnsyncedItem {
    UnsyncedItem {
        kind: record.kind.to_string(),
        id: record.id.to_string(),
        status: record.sync.status.to_string(),
        attempts: record.sync.attempts,
        last_error: record.sync.last_error.clone(),
    }
}

pub fn collect_unsynced(engine: &SyncEngine) -> Result<Vec<ErasedRecord>, CliError> {
    let mut records = Vec::new();
    for kind in EntityKind::ALL {
        records.extend(engine.unsynced(kind)?);
    }
    Ok(records)
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(timestamp).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
