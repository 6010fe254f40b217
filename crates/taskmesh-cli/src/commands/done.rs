use std::path::Path;

use taskmesh_core::models::TaskPatch;
use taskmesh_core::Task;

use crate::commands::common::{open_session, resolve_record};
use crate::error::CliError;

pub async fn run_done(id: &str, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    let task = resolve_record::<Task>(&session.engine, id)?;

    if !task.fields.completed {
        session
            .engine
            .update::<Task>(&task.id, TaskPatch::completed(true))
            .await?;
    }
    println!("{}", task.id);

    session.finish().await;
    Ok(())
}
