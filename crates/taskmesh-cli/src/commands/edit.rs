use std::path::Path;

use taskmesh_core::models::TaskPatch;
use taskmesh_core::Task;

use crate::commands::common::{normalize_title, open_session, resolve_record};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    title_parts: &[String],
    db_path: &Path,
    offline: bool,
) -> Result<(), CliError> {
    let title = normalize_title(title_parts).ok_or(CliError::EmptyTitle)?;
    let session = open_session(db_path, offline)?;
    let task = resolve_record::<Task>(&session.engine, id)?;

    if task.fields.title == title {
        println!("No changes.");
    } else {
        let task = session
            .engine
            .update::<Task>(&task.id, TaskPatch::title(title))
            .await?;
        println!("{}", task.id);
    }

    session.finish().await;
    Ok(())
}
