use std::path::Path;

use serde::Serialize;

use crate::commands::common::{collect_unsynced, open_session, unsynced_to_item, UnsyncedItem};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    sync_enabled: bool,
    pending: usize,
    failed: usize,
    records: Vec<UnsyncedItem>,
}

pub async fn run_status(as_json: bool, db_path: &Path, offline: bool) -> Result<(), CliError> {
    let session = open_session(db_path, offline)?;
    let report = StatusReport {
        sync_enabled: session.is_sync_enabled(),
        pending: session.engine.pending_count()?,
        failed: session.engine.failed_count()?,
        records: collect_unsynced(&session.engine)?
            .iter()
            .map(unsynced_to_item)
            .collect(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let mode = if report.sync_enabled { "enabled" } else { "local only" };
        println!("Sync: {mode}");
        println!("Pending: {}  Failed: {}", report.pending, report.failed);
        for item in &report.records {
            let error = item.last_error.as_deref().unwrap_or("-");
            println!(
                "  {} {} {} attempts={} error={error}",
                item.kind, item.id, item.status, item.attempts
            );
        }
    }

    session.finish().await;
    Ok(())
}
