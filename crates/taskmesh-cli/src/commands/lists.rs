use std::path::Path;

use taskmesh_core::TaskList;

use crate::commands::common::{list_to_item, open_session, status_marker};
use crate::error::CliError;

pub async fn run_lists(as_json: bool, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    let lists = session.engine.list::<TaskList>()?;

    if as_json {
        let items: Vec<_> = lists.iter().map(list_to_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if lists.is_empty() {
        println!("No lists yet. Create one with: taskmesh new-list \"...\"");
    } else {
        for list in &lists {
            println!("{}  {}{}", list.id, list.fields.name, status_marker(list.status()));
        }
    }

    session.finish().await;
    Ok(())
}
