use std::path::Path;

use taskmesh_core::{Task, TaskList};

use crate::commands::common::{normalize_title, open_session, parse_due, resolve_record};
use crate::error::CliError;

pub async fn run_add(
    title_parts: &[String],
    list: Option<&str>,
    due: Option<&str>,
    priority: u8,
    db_path: &Path,
    offline: bool,
) -> Result<(), CliError> {
    let title = normalize_title(title_parts).ok_or(CliError::EmptyTitle)?;
    let due_at = due.map(parse_due).transpose()?;

    let session = open_session(db_path, offline)?;
    let mut task = Task::new(title).with_priority(priority);
    if let Some(due_at) = due_at {
        task = task.with_due_at(due_at);
    }
    if let Some(list) = list {
        let list = resolve_record::<TaskList>(&session.engine, list)?;
        task = task.in_list(list.id);
    }

    let task = session.engine.create(task).await?;
    println!("{}", task.id);
    session.finish().await;
    Ok(())
}
