//! Record repository implementation

use crate::error::Result;
use crate::models::{EntityKind, ErasedRecord, Record, RecordId, SyncState, SyncStatus};
use crate::util::{from_nanos, to_nanos};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

const SELECT_COLUMNS: &str = "id, fields, sync_status, sync_attempts, last_sync_attempt_at, \
     last_sync_error, last_synced_at, failed_from, created_at, updated_at";

/// Trait for durable record storage operations
pub trait RecordRepository {
    /// Insert or replace a record and its reference index entries
    fn upsert(&self, record: &ErasedRecord) -> Result<()>;

    /// Get a record by kind and id, including hidden pending deletes
    fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<ErasedRecord>>;

    /// Remove a record entirely. Returns whether a row was removed.
    fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<bool>;

    /// Records of a kind whose status is one of `statuses`, oldest change first
    fn query_by_status(&self, kind: EntityKind, statuses: &[SyncStatus])
        -> Result<Vec<ErasedRecord>>;

    /// Records of any kind holding `foreign_id` in a reference field
    fn query_referencing(&self, foreign_id: &RecordId) -> Result<Vec<ErasedRecord>>;

    /// Every record of a kind, hidden ones included
    fn list_all(&self, kind: EntityKind) -> Result<Vec<ErasedRecord>>;

    /// Records of a kind that normal reads should show, newest first
    fn list_visible(&self, kind: EntityKind) -> Result<Vec<ErasedRecord>>;

    /// Count records across all kinds with the given status
    fn count_by_status(&self, status: SyncStatus) -> Result<usize>;

    /// Remember that `provisional` now lives on as `canonical`
    fn record_alias(
        &self,
        kind: EntityKind,
        provisional: &RecordId,
        canonical: &RecordId,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Canonical id a provisional id was reconciled to, if any
    fn resolve_alias(&self, kind: EntityKind, provisional: &RecordId) -> Result<Option<RecordId>>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replace the reference index entries for a record
    fn sync_refs(&self, record: &ErasedRecord) -> Result<()> {
        self.clear_refs(record.kind, &record.id)?;

        for foreign_id in record.references()? {
            self.conn.execute(
                "INSERT OR IGNORE INTO record_refs (kind, record_id, foreign_id) VALUES (?1, ?2, ?3)",
                params![record.kind.as_str(), record.id.as_str(), foreign_id.as_str()],
            )?;
        }

        Ok(())
    }

    fn clear_refs(&self, kind: EntityKind, id: &RecordId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM record_refs WHERE kind = ?1 AND record_id = ?2",
            params![kind.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    /// Parse a record from a database row
    fn parse_record(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<ErasedRecord> {
        let id: String = row.get(0)?;
        Ok(Record {
            kind,
            id: RecordId::new(id),
            fields: row.get(1)?,
            sync: SyncState {
                status: row.get(2)?,
                attempts: row.get(3)?,
                last_attempt_at: row.get::<_, Option<i64>>(4)?.map(from_nanos),
                last_error: row.get(5)?,
                last_synced_at: row.get::<_, Option<i64>>(6)?.map(from_nanos),
                failed_from: row.get(7)?,
            },
            created_at: from_nanos(row.get(8)?),
            updated_at: from_nanos(row.get(9)?),
        })
    }

    fn select(
        &self,
        kind: EntityKind,
        where_clause: &str,
        order: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ErasedRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE {where_clause} ORDER BY {order}",
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params, |row| Self::parse_record(kind, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn upsert(&self, record: &ErasedRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({SELECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                fields = excluded.fields,
                sync_status = excluded.sync_status,
                sync_attempts = excluded.sync_attempts,
                last_sync_attempt_at = excluded.last_sync_attempt_at,
                last_sync_error = excluded.last_sync_error,
                last_synced_at = excluded.last_synced_at,
                failed_from = excluded.failed_from,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            record.kind.table()
        );

        self.conn.execute(
            &sql,
            params![
                record.id.as_str(),
                record.fields,
                record.sync.status,
                record.sync.attempts,
                record.sync.last_attempt_at.map(to_nanos),
                record.sync.last_error,
                record.sync.last_synced_at.map(to_nanos),
                record.sync.failed_from,
                to_nanos(record.created_at),
                to_nanos(record.updated_at),
            ],
        )?;

        self.sync_refs(record)
    }

    fn get(&self, kind: EntityKind, id: &RecordId) -> Result<Option<ErasedRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM {} WHERE id = ?1", kind.table());
        let record = self
            .conn
            .query_row(&sql, params![id.as_str()], |row| {
                Self::parse_record(kind, row)
            })
            .optional()?;
        Ok(record)
    }

    fn delete(&self, kind: EntityKind, id: &RecordId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", kind.table());
        let rows = self.conn.execute(&sql, params![id.as_str()])?;
        self.clear_refs(kind, id)?;
        Ok(rows > 0)
    }

    fn query_by_status(
        &self,
        kind: EntityKind,
        statuses: &[SyncStatus],
    ) -> Result<Vec<ErasedRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        self.select(
            kind,
            &format!("sync_status IN ({placeholders})"),
            "updated_at ASC",
            params_from_iter(statuses.iter()),
        )
    }

    fn query_referencing(&self, foreign_id: &RecordId) -> Result<Vec<ErasedRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, record_id FROM record_refs WHERE foreign_id = ?1 ORDER BY kind, record_id",
        )?;
        let keys = stmt
            .query_map(params![foreign_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records = Vec::with_capacity(keys.len());
        for (kind, id) in keys {
            let kind: EntityKind = kind.parse()?;
            if let Some(record) = self.get(kind, &RecordId::new(id))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn list_all(&self, kind: EntityKind) -> Result<Vec<ErasedRecord>> {
        self.select(kind, "1 = 1", "updated_at DESC", [])
    }

    fn list_visible(&self, kind: EntityKind) -> Result<Vec<ErasedRecord>> {
        self.select(
            kind,
            "sync_status != 'pending_delete'
             AND NOT (sync_status = 'failed' AND failed_from IS 'pending_delete')",
            "updated_at DESC",
            [],
        )
    }

    fn count_by_status(&self, status: SyncStatus) -> Result<usize> {
        let mut total = 0usize;
        for kind in EntityKind::ALL {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE sync_status = ?1",
                kind.table()
            );
            let count: usize = self.conn.query_row(&sql, params![status], |row| row.get(0))?;
            total += count;
        }
        Ok(total)
    }

    fn record_alias(
        &self,
        kind: EntityKind,
        provisional: &RecordId,
        canonical: &RecordId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO id_aliases (kind, provisional_id, canonical_id, reconciled_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                kind.as_str(),
                provisional.as_str(),
                canonical.as_str(),
                to_nanos(at)
            ],
        )?;
        Ok(())
    }

    fn resolve_alias(&self, kind: EntityKind, provisional: &RecordId) -> Result<Option<RecordId>> {
        let canonical: Option<String> = self
            .conn
            .query_row(
                "SELECT canonical_id FROM id_aliases WHERE kind = ?1 AND provisional_id = ?2",
                params![kind.as_str(), provisional.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(canonical.map(RecordId::new))
    }
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Comment, ListMembership, MemberRole, Task, TaskList};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn erased<E: crate::models::Entity>(fields: E) -> ErasedRecord {
        Record::new_local(fields, Utc::now()).into_erased().unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup();
        let record = erased(Task::new("Buy milk"));

        db.write(|repo| repo.upsert(&record)).unwrap();
        let fetched = db
            .read(|repo| repo.get(EntityKind::Task, &record.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched, record);

        // Same id in another kind's table is a different record
        let other = db
            .read(|repo| repo.get(EntityKind::Comment, &record.id))
            .unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let db = setup();
        let mut record = erased(Task::new("Original"));
        db.write(|repo| repo.upsert(&record)).unwrap();

        record.fields["title"] = "Updated".into();
        record.sync.attempts = 3;
        db.write(|repo| repo.upsert(&record)).unwrap();

        let fetched = db
            .read(|repo| repo.get(EntityKind::Task, &record.id))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.fields["title"], "Updated");
        assert_eq!(fetched.sync.attempts, 3);
    }

    #[test]
    fn test_delete() {
        let db = setup();
        let list = erased(TaskList::new("Groceries"));
        let task = erased(Task::new("Milk").in_list(list.id.clone()));
        db.write(|repo| {
            repo.upsert(&list)?;
            repo.upsert(&task)
        })
        .unwrap();

        assert!(db.write(|repo| repo.delete(EntityKind::Task, &task.id)).unwrap());
        assert!(!db.write(|repo| repo.delete(EntityKind::Task, &task.id)).unwrap());
        assert!(db
            .read(|repo| repo.query_referencing(&list.id))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_query_by_status() {
        let db = setup();
        let pending = erased(Task::new("pending"));
        let mut synced = erased(Task::new("synced"));
        synced.id = RecordId::new("1");
        synced.sync = SyncState::synced(Utc::now());
        let mut deleting = erased(Task::new("deleting"));
        deleting.id = RecordId::new("2");
        deleting.sync = SyncState::synced(Utc::now());
        deleting.sync.mark_deleted();

        db.write(|repo| {
            repo.upsert(&pending)?;
            repo.upsert(&synced)?;
            repo.upsert(&deleting)
        })
        .unwrap();

        let found = db
            .read(|repo| repo.query_by_status(EntityKind::Task, &SyncStatus::RETRYABLE))
            .unwrap();
        let mut ids: Vec<_> = found.into_iter().map(|r| r.id).collect();
        ids.sort();
        let mut expected = vec![pending.id.clone(), deleting.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        let none = db
            .read(|repo| repo.query_by_status(EntityKind::Task, &[]))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_query_referencing_spans_kinds() {
        let db = setup();
        let list = erased(TaskList::new("Shared"));
        let task = erased(Task::new("a").in_list(list.id.clone()));
        let membership = erased(ListMembership::new(list.id.clone(), "u1", MemberRole::Owner));
        let comment = erased(Comment::new(task.id.clone(), "u1", "hi"));

        db.write(|repo| {
            for record in [&list, &task, &membership, &comment] {
                repo.upsert(record)?;
            }
            Ok(())
        })
        .unwrap();

        let referencing = db.read(|repo| repo.query_referencing(&list.id)).unwrap();
        let mut kinds: Vec<_> = referencing.iter().map(|r| r.kind).collect();
        kinds.sort();
        assert_eq!(kinds, vec![EntityKind::Task, EntityKind::ListMembership]);

        let on_task = db.read(|repo| repo.query_referencing(&task.id)).unwrap();
        assert_eq!(on_task.len(), 1);
        assert_eq!(on_task[0].id, comment.id);
    }

    #[test]
    fn test_list_visible_hides_deletes() {
        let db = setup();
        let shown = erased(TaskList::new("shown"));
        let mut hidden = erased(TaskList::new("hidden"));
        hidden.id = RecordId::new("5");
        hidden.sync = SyncState::synced(Utc::now());
        hidden.sync.mark_deleted();
        let mut failed_delete = erased(TaskList::new("failed delete"));
        failed_delete.id = RecordId::new("6");
        failed_delete.sync.status = SyncStatus::Failed;
        failed_delete.sync.failed_from = Some(SyncStatus::PendingDelete);

        db.write(|repo| {
            repo.upsert(&shown)?;
            repo.upsert(&hidden)?;
            repo.upsert(&failed_delete)
        })
        .unwrap();

        let visible = db
            .read(|repo| repo.list_visible(EntityKind::TaskList))
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, shown.id);

        let all = db.read(|repo| repo.list_all(EntityKind::TaskList)).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_count_by_status() {
        let db = setup();
        db.write(|repo| {
            repo.upsert(&erased(Task::new("a")))?;
            repo.upsert(&erased(TaskList::new("b")))?;
            repo.upsert(&erased(Comment::new(RecordId::new("1"), "u", "c")))
        })
        .unwrap();

        let pending = db
            .read(|repo| repo.count_by_status(SyncStatus::Pending))
            .unwrap();
        assert_eq!(pending, 3);
        let failed = db
            .read(|repo| repo.count_by_status(SyncStatus::Failed))
            .unwrap();
        assert_eq!(failed, 0);
    }

    #[test]
    fn test_aliases() {
        let db = setup();
        let provisional = RecordId::provisional();
        let canonical = RecordId::new("99");

        assert!(db
            .read(|repo| repo.resolve_alias(EntityKind::Task, &provisional))
            .unwrap()
            .is_none());

        db.write(|repo| repo.record_alias(EntityKind::Task, &provisional, &canonical, Utc::now()))
            .unwrap();

        let resolved = db
            .read(|repo| repo.resolve_alias(EntityKind::Task, &provisional))
            .unwrap();
        assert_eq!(resolved, Some(canonical));
        assert!(db
            .read(|repo| repo.resolve_alias(EntityKind::Comment, &provisional))
            .unwrap()
            .is_none());
    }
}
