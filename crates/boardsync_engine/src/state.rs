//! Sync orchestrator state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::source::{RemoteSource, SourceCursor};
use boardsync_store::{RunStatus, SyncRun, UpsertStore};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// The state of one source in the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Never synced by this orchestrator.
    Idle,
    /// A run is in progress.
    Running,
    /// The last run fetched and stored every page.
    Success,
    /// The last run failed after storing some records.
    Partial,
    /// The last run failed before storing any record.
    Failed,
}

impl SyncState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Running)
    }

    /// Returns true if a new run may start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

impl From<RunStatus> for SyncState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => SyncState::Running,
            RunStatus::Success => SyncState::Success,
            RunStatus::Partial => SyncState::Partial,
            RunStatus::Failed => SyncState::Failed,
        }
    }
}

/// Counters kept outside the run future so they survive a timeout.
#[derive(Debug, Default)]
struct Progress {
    records: u64,
    pages: u32,
    retries: u32,
}

/// Drives remote sources through the retry policy into the store.
///
/// Each source moves through `Idle -> Running -> {Success, Partial, Failed}`
/// and may start again from any terminal state. Different sources may run
/// concurrently; a second run of the same source is rejected while the
/// first is in progress.
pub struct SyncOrchestrator {
    store: Arc<dyn UpsertStore>,
    config: SyncConfig,
    retry: RetryPolicy,
    states: RwLock<HashMap<String, SyncState>>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator writing into `store`.
    pub fn new(store: Arc<dyn UpsertStore>, config: SyncConfig) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            store,
            config,
            retry,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the store.
    pub fn store(&self) -> &Arc<dyn UpsertStore> {
        &self.store
    }

    /// Gets the state of `source`.
    pub fn state(&self, source: &str) -> SyncState {
        self.states.read().get(source).copied().unwrap_or(SyncState::Idle)
    }

    /// Runs one full sync of `source` into `table`.
    ///
    /// Every failure inside the run is reported through the returned
    /// [`SyncRun`] (`status` and `error`), never as an `Err`. Records
    /// stored before a failure stay stored.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRunning`] if `source` is already syncing.
    pub async fn run(&self, source: &dyn RemoteSource, table: &str) -> SyncResult<SyncRun> {
        let name = source.name().to_string();
        let _claim = self.claim(&name)?;

        let started = Instant::now();
        let mut run = SyncRun::begin(name.as_str(), table, Utc::now());
        tracing::info!(source = %name, table, "sync started");

        let prepared = self
            .store
            .ensure_table(table)
            .and_then(|()| self.store.start_run(&run));
        let outcome = match prepared {
            Ok(run_id) => {
                run.run_id = Some(run_id);
                let mut progress = Progress::default();
                let outcome = self.pull_with_timeout(source, table, &mut progress).await;
                run.records_upserted = progress.records;
                run.pages_fetched = progress.pages;
                run.retries = progress.retries;
                outcome
            }
            Err(e) => Err(SyncError::Storage(e)),
        };

        let finished_at = Utc::now();
        let outcome = outcome.and_then(|()| {
            self.store
                .mark_sync_complete(table, finished_at)
                .map_err(SyncError::from)
        });

        run.finished_at = Some(finished_at);
        run.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        run.failures = run.retries;
        match outcome {
            Ok(()) => {
                run.status = RunStatus::Success;
                tracing::info!(
                    source = %name,
                    table,
                    records = run.records_upserted,
                    pages = run.pages_fetched,
                    retries = run.retries,
                    duration_ms = run.duration_ms,
                    "sync completed"
                );
            }
            Err(e) => {
                // the attempt that ended the run
                run.failures += 1;
                run.status = RunStatus::for_failure(run.records_upserted);
                run.error = Some(e.to_string());
                tracing::error!(
                    source = %name,
                    table,
                    status = %run.status,
                    records = run.records_upserted,
                    error = %e,
                    "sync failed"
                );
            }
        }

        if let Some(run_id) = run.run_id {
            if let Err(e) = self.store.finish_run(run_id, &run) {
                tracing::warn!(source = %name, run_id, error = %e, "failed to write sync log");
            }
        }

        self.states.write().insert(name, run.status.into());
        Ok(run)
    }

    /// Marks `source` as running, or rejects it if it already is.
    fn claim(&self, source: &str) -> SyncResult<RunClaim<'_>> {
        let mut states = self.states.write();
        let state = states.entry(source.to_string()).or_insert(SyncState::Idle);
        if !state.can_start_sync() {
            return Err(SyncError::AlreadyRunning(source.to_string()));
        }
        *state = SyncState::Running;
        Ok(RunClaim {
            states: &self.states,
            source: source.to_string(),
        })
    }

    async fn pull_with_timeout(
        &self,
        source: &dyn RemoteSource,
        table: &str,
        progress: &mut Progress,
    ) -> SyncResult<()> {
        let Some(limit) = self.config.run_timeout else {
            return self.pull(source, table, progress).await;
        };
        match tokio::time::timeout(limit, self.pull(source, table, progress)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::Timeout {
                source_name: source.name().to_string(),
                after: limit,
            }),
        }
    }

    /// Fetches pages until the source is exhausted, storing each one before
    /// asking for the next.
    async fn pull(&self, source: &dyn RemoteSource, table: &str, progress: &mut Progress) -> SyncResult<()> {
        let name = source.name();
        let mut cursor: Option<SourceCursor> = None;

        loop {
            if progress.pages >= self.config.max_pages {
                return Err(SyncError::PageLimit {
                    source_name: name.to_string(),
                    max_pages: self.config.max_pages,
                });
            }

            let page = self
                .retry
                .execute_counting(name, &mut progress.retries, || source.fetch_page(cursor.as_ref()))
                .await?
                .value;
            progress.pages += 1;

            match self.store.upsert_batch(table, &page.records) {
                Ok(applied) => progress.records += applied as u64,
                Err(e) => {
                    progress.records += e.applied() as u64;
                    return Err(e.into());
                }
            }
            tracing::debug!(
                source = name,
                page = progress.pages,
                records = page.records.len(),
                total = progress.records,
                "page stored"
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }
}

/// Resets a source stuck in `Running` if its run future is dropped early.
struct RunClaim<'a> {
    states: &'a RwLock<HashMap<String, SyncState>>,
    source: String,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        let mut states = self.states.write();
        if let Some(state) = states.get_mut(&self.source) {
            if state.is_active() {
                *state = SyncState::Failed;
            }
        }
    }
}
