//! SQLite-backed implementation of [`UpsertStore`].
//!
//! Uses a single `Mutex<Connection>` so writers within one process are
//! serialized. WAL journaling lets readers in other processes (dashboards)
//! read while a sync is writing, and the busy timeout absorbs short lock
//! contention between processes.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::{validate_table_name, UpsertStore};
use crate::error::{StorageError, StorageResult};
use crate::record::{Fields, Record};
use crate::run::{RunStatus, SyncRun, TableInfo};

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Idempotent DDL for the bookkeeping tables.
const CREATE_META_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS sync_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    table_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    records INTEGER NOT NULL DEFAULT 0,
    pages INTEGER NOT NULL DEFAULT 0,
    retries INTEGER NOT NULL DEFAULT 0,
    failures INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_log_source ON sync_log (source, id);

CREATE TABLE IF NOT EXISTS sync_state (
    table_name TEXT PRIMARY KEY,
    last_synced_at TEXT NOT NULL
);
";

/// SQLite-backed upsert store.
///
/// Create with [`SqliteStore::open`] for a database file or
/// [`SqliteStore::in_memory`] for tests. The connection is closed when the
/// store is dropped.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory can't be created, or
    /// [`StorageError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Self::init(conn)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sqlite`] if initialization fails.
    pub fn in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(CREATE_META_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn require_table(conn: &Connection, table: &str) -> StorageResult<()> {
        validate_table_name(table)?;
        if Self::table_exists(conn, table)? {
            Ok(())
        } else {
            Err(StorageError::UnknownTable(table.to_string()))
        }
    }

    fn upsert_locked(conn: &Connection, table: &str, record: &Record) -> StorageResult<()> {
        record.validate()?;
        let field_json = serde_json::to_string(&record.fields)?;
        let last_modified = record.last_modified.map(format_ts);
        let sql = format!(
            "INSERT INTO \"{table}\" (external_id, field_json, last_modified) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(external_id) \
             DO UPDATE SET field_json = excluded.field_json, last_modified = excluded.last_modified"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        stmt.execute(params![record.external_id, field_json, last_modified])?;
        Ok(())
    }

    #[cfg(test)]
    fn raw_row(&self, table: &str, external_id: &str) -> StorageResult<Option<(String, Option<String>)>> {
        let conn = self.lock_conn();
        let sql = format!("SELECT field_json, last_modified FROM \"{table}\" WHERE external_id = ?1");
        conn.query_row(&sql, [external_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()
            .map_err(StorageError::from)
    }
}

/// Formats a timestamp for storage. Fixed-width so text order is time order.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupted(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl UpsertStore for SqliteStore {
    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        validate_table_name(table)?;
        let conn = self.lock_conn();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (\
                external_id TEXT PRIMARY KEY, \
                field_json TEXT NOT NULL, \
                last_modified TEXT\
            );"
        ))?;
        Ok(())
    }

    fn upsert(&self, table: &str, record: &Record) -> StorageResult<()> {
        validate_table_name(table)?;
        let conn = self.lock_conn();
        Self::upsert_locked(&conn, table, record)
    }

    fn upsert_batch(&self, table: &str, records: &[Record]) -> StorageResult<usize> {
        validate_table_name(table)?;
        // Held for the whole batch so another writer cannot interleave rows;
        // each statement still commits on its own.
        let conn = self.lock_conn();
        for (applied, record) in records.iter().enumerate() {
            if let Err(cause) = Self::upsert_locked(&conn, table, record) {
                tracing::warn!(table, applied, external_id = %record.external_id, error = %cause, "batch interrupted");
                return Err(StorageError::PartialBatch {
                    applied,
                    cause: Box::new(cause),
                });
            }
        }
        Ok(records.len())
    }

    fn mark_sync_complete(&self, table: &str, at: DateTime<Utc>) -> StorageResult<()> {
        validate_table_name(table)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO sync_state (table_name, last_synced_at) VALUES (?1, ?2) \
             ON CONFLICT(table_name) DO UPDATE SET last_synced_at = excluded.last_synced_at",
            params![table, format_ts(at)],
        )?;
        Ok(())
    }

    fn last_sync(&self, table: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_synced_at FROM sync_state WHERE table_name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        parse_opt_ts(raw)
    }

    fn read_all(&self, table: &str) -> StorageResult<Vec<Record>> {
        let conn = self.lock_conn();
        Self::require_table(&conn, table)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT external_id, field_json, last_modified FROM \"{table}\" ORDER BY external_id"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (external_id, field_json, last_modified) = row?;
            let fields: Fields = serde_json::from_str(&field_json)?;
            records.push(Record {
                external_id,
                fields,
                last_modified: parse_opt_ts(last_modified)?,
            });
        }
        Ok(records)
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let conn = self.lock_conn();
        Self::require_table(&conn, table)?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| row.get(0))?;
        Ok(to_u64(count))
    }

    fn table_info(&self, table: &str) -> StorageResult<TableInfo> {
        let conn = self.lock_conn();
        Self::require_table(&conn, table)?;
        let (row_count, last_modified): (i64, Option<String>) = conn.query_row(
            &format!("SELECT COUNT(*), MAX(last_modified) FROM \"{table}\""),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let last_synced: Option<String> = conn
            .query_row(
                "SELECT last_synced_at FROM sync_state WHERE table_name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;

        Ok(TableInfo {
            table: table.to_string(),
            row_count: to_u64(row_count),
            last_synced_at: parse_opt_ts(last_synced)?,
            last_modified: parse_opt_ts(last_modified)?,
        })
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for name in names {
            let name = name?;
            if validate_table_name(&name).is_ok() {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    fn start_run(&self, run: &SyncRun) -> StorageResult<i64> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO sync_log (source, table_name, started_at, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                run.source,
                run.table,
                format_ts(run.started_at),
                RunStatus::Running.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, run: &SyncRun) -> StorageResult<()> {
        let conn = self.lock_conn();
        let updated = conn.execute(
            "UPDATE sync_log SET finished_at = ?1, status = ?2, records = ?3, pages = ?4, \
             retries = ?5, failures = ?6, duration_ms = ?7, error = ?8 WHERE id = ?9",
            params![
                run.finished_at.map(format_ts),
                run.status.as_str(),
                to_i64(run.records_upserted),
                run.pages_fetched,
                run.retries,
                run.failures,
                to_i64(run.duration_ms),
                run.error,
                run_id,
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::Corrupted(format!("sync_log row {run_id} not found")));
        }
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<SyncRun>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, source, table_name, started_at, finished_at, status, records, pages, \
             retries, failures, duration_ms, error \
             FROM sync_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([to_i64(limit as u64)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, Option<String>>(11)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, source, table, started, finished, status, records, pages, retries, failures, duration_ms, error) =
                row?;
            runs.push(SyncRun {
                run_id: Some(id),
                source,
                table,
                started_at: parse_ts(&started)?,
                finished_at: parse_opt_ts(finished)?,
                duration_ms: to_u64(duration_ms),
                records_upserted: to_u64(records),
                pages_fetched: to_u32(pages),
                retries: to_u32(retries),
                failures: to_u32(failures),
                status: status.parse().map_err(StorageError::Corrupted)?,
                error,
            });
        }
        Ok(runs)
    }
}
