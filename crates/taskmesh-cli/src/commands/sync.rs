use std::path::Path;

use taskmesh_core::{Comment, FetchScope, ListMembership, Task, TaskList};

use crate::commands::common::open_session;
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, offline: bool) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    if !session.is_sync_enabled() {
        return Err(CliError::SyncNotConfigured);
    }

    let report = session.engine.sweep().await?;
    session.engine.wait_idle().await;

    // Parents first so children never point at ids the store has not seen.
    let lists = session.engine.refresh::<TaskList>(FetchScope::All).await?;
    session.engine.refresh::<ListMembership>(FetchScope::All).await?;
    let tasks = session.engine.refresh::<Task>(FetchScope::All).await?;
    session.engine.refresh::<Comment>(FetchScope::All).await?;

    println!(
        "Pushed {} of {} ({} failed, {} waiting). {} lists, {} tasks.",
        report.synced,
        report.attempted,
        report.failed,
        report.deferred,
        lists.len(),
        tasks.len()
    );

    session.finish().await;
    Ok(())
}
