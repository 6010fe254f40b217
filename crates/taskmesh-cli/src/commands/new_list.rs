use std::path::Path;

use taskmesh_core::TaskList;

use crate::commands::common::{normalize_title, open_session};
use crate::error::CliError;

pub async fn run_new_list(name_parts: &[String], db_path: &Path, offline: bool) -> Result<(), CliError> {
    let name = normalize_title(name_parts).ok_or(CliError::EmptyListName)?;
    let session = open_session(db_path, offline)?;

    // New lists go to the end of the manual ordering.
    let position = session
        .engine
        .list::<TaskList>()?
        .iter()
        .map(|list| list.fields.position)
        .max()
        .map_or(0, |last| last.saturating_add(1));

    let list = session
        .engine
        .create(TaskList {
            position,
            ..TaskList::new(name)
        })
        .await?;
    println!("{}", list.id);

    session.finish().await;
    Ok(())
}
