use std::path::Path;

use crate::commands::common::open_session;
use crate::error::CliError;

pub async fn run_retry(db_path: &Path, offline: bool) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    let failed = session.engine.failed_count()?;
    if failed == 0 {
        println!("Nothing to retry.");
        session.finish().await;
        return Ok(());
    }

    let report = session.engine.retry_failed().await?;
    if session.is_sync_enabled() {
        println!(
            "Retried {failed}: {} synced, {} failed, {} waiting.",
            report.synced, report.failed, report.deferred
        );
    } else {
        println!("Reset {failed} failed records; they sync once a remote is configured.");
    }

    session.finish().await;
    Ok(())
}
