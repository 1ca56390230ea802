//! # boardsync engine
//!
//! Pulls paginated remote APIs into a local [`UpsertStore`](boardsync_store::UpsertStore).
//!
//! This crate provides:
//! - The [`RemoteSource`] adapter trait and its Monday.com, Calendly and
//!   in-memory implementations
//! - Retry with exponential backoff and transient/fatal classification
//! - The per-source sync state machine (idle → running → success/partial/failed)
//! - A registry of named sources, synced one at a time or all concurrently
//!
//! ## Architecture
//!
//! One run walks a source page by page:
//! 1. Fetch the next page through the retry policy
//! 2. Upsert its records into the source's table
//! 3. Advance the cursor, until the source reports no next page
//!
//! ## Key Invariants
//!
//! - Every run starts from the first page
//! - Page N+1 is fetched only after page N is stored
//! - Records stored before a failure stay stored
//! - Only a run that stored every page marks the table as synced
//! - Failures inside a run are reported in its [`SyncRun`](boardsync_store::SyncRun), not as errors

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod calendly;
mod config;
mod error;
pub mod http;
mod monday;
mod registry;
mod retry;
mod source;
mod state;

pub use calendly::{CalendlyConfig, CalendlyEventsSource, CALENDLY_API_URL};
pub use config::{RetryConfig, SyncConfig};
pub use error::{RemoteError, RemoteResult, SyncError, SyncResult};
pub use monday::{MondayBoardSource, MondayConfig, DEFAULT_PAGE_LIMIT, MONDAY_API_URL};
pub use registry::{Binding, SourceRegistry};
pub use retry::{Retried, RetryPolicy};
pub use source::{Page, RemoteSource, SourceCursor, StaticSource};
pub use state::{SyncOrchestrator, SyncState};
