//! Upsert store trait definition.

use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::run::{SyncRun, TableInfo};
use chrono::{DateTime, Utc};

/// Longest accepted table name.
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// Local durable store that mirrors remote sources, one table per source.
///
/// Rows are keyed by external ID. The store is the only writer of its
/// tables; readers see whatever has been committed so far.
///
/// # Invariants
///
/// - `upsert` is idempotent: applying the same record twice leaves the
///   same row
/// - Each record is written atomically
/// - `upsert_batch` applies records in order, so a later duplicate wins
/// - An interrupted batch keeps the records applied before the failure
/// - Writers to the same store are serialized
///
/// # Implementors
///
/// - [`super::SqliteStore`] - SQLite file or in-memory database
/// - [`super::InMemoryStore`] - For testing
pub trait UpsertStore: Send + Sync {
    /// Creates `table` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTableName`] for unsafe names, or a
    /// backend error.
    fn ensure_table(&self, table: &str) -> StorageResult<()>;

    /// Inserts the record if its external ID is absent, otherwise replaces
    /// all of its fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the write fails.
    fn upsert(&self, table: &str, record: &Record) -> StorageResult<()>;

    /// Upserts records in order and returns how many were applied.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::PartialBatch`] carrying the number of
    /// records committed before the failure.
    fn upsert_batch(&self, table: &str, records: &[Record]) -> StorageResult<usize> {
        for (applied, record) in records.iter().enumerate() {
            if let Err(cause) = self.upsert(table, record) {
                return Err(StorageError::PartialBatch {
                    applied,
                    cause: Box::new(cause),
                });
            }
        }
        Ok(records.len())
    }

    /// Records the time of the last successful full sync of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn mark_sync_complete(&self, table: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Returns the time of the last successful full sync of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn last_sync(&self, table: &str) -> StorageResult<Option<DateTime<Utc>>>;

    /// Reads every row of `table`, ordered by external ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or a row is corrupt.
    fn read_all(&self, table: &str) -> StorageResult<Vec<Record>>;

    /// Counts the rows of `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn count(&self, table: &str) -> StorageResult<u64>;

    /// Returns row count and freshness for `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn table_info(&self, table: &str) -> StorageResult<TableInfo>;

    /// Lists the mirrored tables, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn tables(&self) -> StorageResult<Vec<String>>;

    /// Writes a `sync_log` row for a run that is starting and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn start_run(&self, run: &SyncRun) -> StorageResult<i64>;

    /// Updates the `sync_log` row of a finished run.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn finish_run(&self, run_id: i64, run: &SyncRun) -> StorageResult<()>;

    /// Returns the latest `limit` runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<SyncRun>>;
}

/// Checks that `table` is safe to splice into SQL as an identifier.
///
/// Accepted names start with an ASCII letter, contain only ASCII letters,
/// digits and underscores, and do not collide with the store's own
/// `sync_*` tables or SQLite's `sqlite_*` tables.
///
/// # Errors
///
/// Returns [`StorageError::InvalidTableName`] otherwise.
pub fn validate_table_name(table: &str) -> StorageResult<()> {
    let mut chars = table.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    let lower = table.to_ascii_lowercase();
    let reserved = lower.starts_with("sync_") || lower.starts_with("sqlite_");

    if !starts_with_letter || !rest_ok || table.len() > MAX_TABLE_NAME_LEN || reserved {
        return Err(StorageError::InvalidTableName(table.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn UpsertStore) {}
    }

    #[test]
    fn accepts_board_names() {
        for name in ["sales_board", "calendly_events", "Board2", "a"] {
            assert!(validate_table_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_unsafe_names() {
        let too_long = "t".repeat(MAX_TABLE_NAME_LEN + 1);
        for name in [
            "",
            "1board",
            "_board",
            "sales board",
            "sales;drop table x",
            "sync_log",
            "SQLITE_master",
            too_long.as_str(),
        ] {
            assert!(
                matches!(validate_table_name(name), Err(StorageError::InvalidTableName(_))),
                "{name:?}"
            );
        }
    }
}
