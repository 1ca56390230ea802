//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing the local store.
///
/// Every variant is fatal to the sync run that hit it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying SQLite failure (I/O, corruption, lock contention).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system failure, e.g. creating the database directory.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record's fields could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The table name is not a safe SQL identifier.
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    /// The table does not exist.
    #[error("no such table: {0}")]
    UnknownTable(String),

    /// A record carries a value that cannot be stored, such as a NaN float.
    #[error("record {external_id}: field {field:?} is not storable: {reason}")]
    InvalidField {
        /// Record holding the value.
        external_id: String,
        /// Field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A stored value could not be interpreted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A batch stopped part way through. The first `applied` records are
    /// committed.
    #[error("batch interrupted after {applied} records: {cause}")]
    PartialBatch {
        /// Records committed before the failure.
        applied: usize,
        /// The error that stopped the batch.
        cause: Box<StorageError>,
    },
}

impl StorageError {
    /// Number of records committed before this error, for batch failures.
    pub fn applied(&self) -> usize {
        match self {
            StorageError::PartialBatch { applied, .. } => *applied,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_batch_reports_applied() {
        let err = StorageError::PartialBatch {
            applied: 7,
            cause: Box::new(StorageError::Corrupted("bad row".into())),
        };
        assert_eq!(err.applied(), 7);
        assert!(err.to_string().contains("after 7 records"));
        assert!(err.to_string().contains("bad row"));
    }

    #[test]
    fn other_errors_report_zero_applied() {
        let err = StorageError::InvalidTableName("drop table".into());
        assert_eq!(err.applied(), 0);
        assert_eq!(err.to_string(), "invalid table name: \"drop table\"");
    }

    #[test]
    fn io_error_wraps() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err = StorageError::from(inner);
        assert!(err.to_string().contains("I/O"));
    }
}
