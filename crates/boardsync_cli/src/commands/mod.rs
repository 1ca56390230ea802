//! CLI command implementations.

pub mod show;
pub mod status;
pub mod sync;

use boardsync_store::SqliteStore;
use std::path::Path;

/// Opens an existing database without creating it.
pub(crate) fn open_existing(path: &Path) -> Result<SqliteStore, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    tracing::debug!(path = %path.display(), "opening database");
    Ok(SqliteStore::open(path)?)
}
