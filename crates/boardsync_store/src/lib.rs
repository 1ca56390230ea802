//! # boardsync store
//!
//! Local durable store for mirrored remote records.
//!
//! Each source is mirrored into its own table keyed by the external ID the
//! remote API assigns. The store applies insert-or-replace per record,
//! remembers when each table last finished a full sync, and keeps a
//! `sync_log` of every run for troubleshooting.
//!
//! ## Design Principles
//!
//! - The store is the only writer of its tables
//! - Each record write is atomic; batches are not
//! - Readers may see a table while a sync is updating it
//! - The connection is an explicit handle, released when dropped
//!
//! ## Available Stores
//!
//! - [`SqliteStore`] - SQLite file (WAL mode) or in-memory database
//! - [`InMemoryStore`] - For testing
//!
//! ## Example
//!
//! ```rust
//! use boardsync_store::{Record, SqliteStore, UpsertStore};
//!
//! let store = SqliteStore::in_memory().unwrap();
//! store.ensure_table("sales_board").unwrap();
//! store.upsert("sales_board", &Record::new("1").with_field("name", "Acme")).unwrap();
//! assert_eq!(store.read_all("sales_board").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod record;
mod run;
mod sqlite;

pub use backend::{validate_table_name, UpsertStore, MAX_TABLE_NAME_LEN};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStore;
pub use record::{FieldValue, Fields, Record};
pub use run::{RunStatus, SyncRun, TableInfo};
pub use sqlite::SqliteStore;
