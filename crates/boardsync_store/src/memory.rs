//! In-memory upsert store for testing.

use crate::backend::{validate_table_name, UpsertStore};
use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::run::{SyncRun, TableInfo};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, BTreeMap<String, Record>>,
    last_sync: HashMap<String, DateTime<Utc>>,
    runs: Vec<SyncRun>,
    /// Remaining successful record writes before failing, if armed.
    fail_after: Option<usize>,
}

/// An in-memory upsert store.
///
/// Behaves like [`super::SqliteStore`] without touching disk. It can also
/// be armed to fail after a number of record writes, which lets tests
/// exercise interrupted batches.
///
/// # Example
///
/// ```rust
/// use boardsync_store::{InMemoryStore, Record, UpsertStore};
///
/// let store = InMemoryStore::new();
/// store.ensure_table("sales_board").unwrap();
/// store.upsert("sales_board", &Record::new("1").with_field("name", "Acme")).unwrap();
/// assert_eq!(store.count("sales_board").unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every record write fail once `writes` more have succeeded.
    pub fn fail_after(&self, writes: usize) {
        self.inner.write().fail_after = Some(writes);
    }

    /// Clears an armed failure.
    pub fn heal(&self) {
        self.inner.write().fail_after = None;
    }

    fn write_record(inner: &mut Inner, table: &str, record: &Record) -> StorageResult<()> {
        validate_table_name(table)?;
        record.validate()?;
        if let Some(remaining) = inner.fail_after.as_mut() {
            if *remaining == 0 {
                return Err(StorageError::Corrupted("simulated write failure".into()));
            }
            *remaining -= 1;
        }
        let rows = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        rows.insert(record.external_id.clone(), record.clone());
        Ok(())
    }

    fn rows<'a>(inner: &'a Inner, table: &str) -> StorageResult<&'a BTreeMap<String, Record>> {
        validate_table_name(table)?;
        inner
            .tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))
    }
}

impl UpsertStore for InMemoryStore {
    fn ensure_table(&self, table: &str) -> StorageResult<()> {
        validate_table_name(table)?;
        self.inner.write().tables.entry(table.to_string()).or_default();
        Ok(())
    }

    fn upsert(&self, table: &str, record: &Record) -> StorageResult<()> {
        Self::write_record(&mut self.inner.write(), table, record)
    }

    fn upsert_batch(&self, table: &str, records: &[Record]) -> StorageResult<usize> {
        let mut inner = self.inner.write();
        for (applied, record) in records.iter().enumerate() {
            if let Err(cause) = Self::write_record(&mut inner, table, record) {
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
        self.inner.write().last_sync.insert(table.to_string(), at);
        Ok(())
    }

    fn last_sync(&self, table: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(self.inner.read().last_sync.get(table).copied())
    }

    fn read_all(&self, table: &str) -> StorageResult<Vec<Record>> {
        let inner = self.inner.read();
        Ok(Self::rows(&inner, table)?.values().cloned().collect())
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let inner = self.inner.read();
        Ok(Self::rows(&inner, table)?.len() as u64)
    }

    fn table_info(&self, table: &str) -> StorageResult<TableInfo> {
        let inner = self.inner.read();
        let rows = Self::rows(&inner, table)?;
        Ok(TableInfo {
            table: table.to_string(),
            row_count: rows.len() as u64,
            last_synced_at: inner.last_sync.get(table).copied(),
            last_modified: rows.values().filter_map(|r| r.last_modified).max(),
        })
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        Ok(self.inner.read().tables.keys().cloned().collect())
    }

    fn start_run(&self, run: &SyncRun) -> StorageResult<i64> {
        let mut inner = self.inner.write();
        let id = inner.runs.len() as i64 + 1;
        let mut logged = run.clone();
        logged.run_id = Some(id);
        inner.runs.push(logged);
        Ok(id)
    }

    fn finish_run(&self, run_id: i64, run: &SyncRun) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let slot = usize::try_from(run_id - 1)
            .ok()
            .and_then(|i| inner.runs.get_mut(i))
            .ok_or_else(|| StorageError::Corrupted(format!("sync_log row {run_id} not found")))?;
        *slot = run.clone();
        slot.run_id = Some(run_id);
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<SyncRun>> {
        Ok(self.inner.read().runs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_failure_interrupts_batch() {
        let store = InMemoryStore::new();
        store.ensure_table("t").unwrap();
        store.fail_after(2);

        let records: Vec<Record> = ["a", "b", "c", "d"].iter().map(|id| Record::new(*id)).collect();
        let err = store.upsert_batch("t", &records).unwrap_err();

        assert_eq!(err.applied(), 2);
        assert_eq!(store.count("t").unwrap(), 2);

        store.heal();
        assert_eq!(store.upsert_batch("t", &records).unwrap(), 4);
        assert_eq!(store.count("t").unwrap(), 4);
    }

    #[test]
    fn unknown_table_is_an_error() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.upsert("t", &Record::new("a")),
            Err(StorageError::UnknownTable(_))
        ));
    }

    #[test]
    fn run_ids_are_sequential() {
        let store = InMemoryStore::new();
        let run = SyncRun::begin("s", "t", Utc::now());
        assert_eq!(store.start_run(&run).unwrap(), 1);
        assert_eq!(store.start_run(&run).unwrap(), 2);
        assert!(store.finish_run(3, &run).is_err());
        assert_eq!(store.recent_runs(1).unwrap()[0].run_id, Some(2));
    }
}
