use std::path::Path;

use taskmesh_core::Task;

use crate::commands::common::{open_session, resolve_record};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    let task = resolve_record::<Task>(&session.engine, id)?;

    session.engine.delete::<Task>(&task.id).await?;
    println!("{}", task.id);

    session.finish().await;
    Ok(())
}
