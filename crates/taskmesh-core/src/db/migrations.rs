//! Database migrations

use crate::error::Result;
use crate::models::EntityKind;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Apply a list of statements and the version bump atomically
fn apply(conn: &mut Connection, version: i32, statements: &[String]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: one table per entity kind plus reference index
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let mut statements = vec![
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )"
        .to_string(),
    ];

    for kind in EntityKind::ALL {
        let table = kind.table();
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                fields TEXT NOT NULL,
                sync_status TEXT NOT NULL,
                sync_attempts INTEGER NOT NULL DEFAULT 0,
                last_sync_attempt_at INTEGER,
                last_sync_error TEXT,
                last_synced_at INTEGER,
                failed_from TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(sync_status)"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_updated ON {table}(updated_at DESC)"
        ));
    }

    // Which records point at which ids, kept in step with every upsert
    statements.push(
        "CREATE TABLE IF NOT EXISTS record_refs (
            kind TEXT NOT NULL,
            record_id TEXT NOT NULL,
            foreign_id TEXT NOT NULL,
            PRIMARY KEY (kind, record_id, foreign_id)
        )"
        .to_string(),
    );
    statements.push(
        "CREATE INDEX IF NOT EXISTS idx_record_refs_foreign ON record_refs(foreign_id)".to_string(),
    );

    apply(conn, 1, &statements)
}

/// Migration to version 2: provisional id aliases
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS id_aliases (
            kind TEXT NOT NULL,
            provisional_id TEXT NOT NULL,
            canonical_id TEXT NOT NULL,
            reconciled_at INTEGER NOT NULL,
            PRIMARY KEY (kind, provisional_id)
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_id_aliases_canonical ON id_aliases(canonical_id)"
            .to_string(),
    ];

    apply(conn, CURRENT_VERSION, &statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_migrations() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = setup();
        run(&mut conn).unwrap();
        run(&mut conn).unwrap(); // Should not fail

        let version = get_version(&conn).unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_creates_one_table_per_kind() {
        let mut conn = setup();
        run(&mut conn).unwrap();

        for table in ["tasks", "comments", "list_memberships", "task_lists", "record_refs", "id_aliases"] {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }
}
