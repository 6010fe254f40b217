use std::path::Path;

use chrono::Utc;
use taskmesh_core::Task;

use crate::commands::common::{format_task_lines, open_session, task_to_list_item};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    include_completed: bool,
    as_json: bool,
    db_path: &Path,
    offline: bool,
) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    let tasks: Vec<_> = session
        .engine
        .list::<Task>()?
        .into_iter()
        .filter(|task| include_completed || !task.fields.completed)
        .take(limit)
        .collect();
    let now = Utc::now();

    if as_json {
        let items: Vec<_> = tasks.iter().map(|task| task_to_list_item(task, now)).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if tasks.is_empty() {
        println!("No tasks yet. Add one with: taskmesh add \"...\"");
    } else {
        for line in format_task_lines(&tasks, now) {
            println!("{line}");
        }
    }

    session.finish().await;
    Ok(())
}
