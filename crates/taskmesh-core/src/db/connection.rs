//! Database connection management

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::migrations;
use super::repository::SqliteRecordRepository;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of the single `SQLite` connection.
///
/// Writes go through [`Database::write`], which runs the closure inside one
/// transaction: either every statement of a logical mutation lands or none
/// does. The connection mutex serializes writers, so two mutations of the
/// same record can never interleave.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        Self::configure(&conn, true)?;
        let database = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, false)?;
        let database = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for durable local writes
    fn configure(conn: &Connection, on_disk: bool) -> Result<()> {
        if on_disk {
            // WAL keeps readers off the writer's back; FULL sync makes a
            // committed mutation survive power loss.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "FULL")?;
            // Another process (a second CLI invocation) may hold the file.
            conn.busy_timeout(BUSY_TIMEOUT)?;
        }
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let mut conn = self.lock()?;
        migrations::run(&mut conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection lock poisoned".into()))
    }

    /// Run read-only repository calls.
    pub fn read<T>(&self, f: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&SqliteRecordRepository::new(&conn))
    }

    /// Run repository calls as one all-or-nothing transaction.
    ///
    /// An error from `f` rolls back everything it wrote.
    pub fn write<T>(&self, f: impl FnOnce(&SqliteRecordRepository<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&SqliteRecordRepository::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }

    /// Location of the database file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
