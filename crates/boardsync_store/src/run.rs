//! Sync run log types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a sync run as written to the `sync_log` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has started and not yet finished.
    Running,
    /// Every page was fetched and stored.
    Success,
    /// The run failed after committing at least one record.
    Partial,
    /// The run failed before committing any record.
    Failed,
}

impl RunStatus {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// Returns true once the run has reached a final status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Picks the terminal status for a run that stopped on an error.
    pub fn for_failure(records_upserted: u64) -> Self {
        if records_upserted > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Summary of one execution of the sync pipeline for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Row id in `sync_log`, when the start row could be written.
    pub run_id: Option<i64>,
    /// Source name.
    pub source: String,
    /// Destination table.
    pub table: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished. `None` while running.
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Records written to the table.
    pub records_upserted: u64,
    /// Pages fetched successfully.
    pub pages_fetched: u32,
    /// Attempts repeated after a transient failure.
    pub retries: u32,
    /// Failed remote or storage attempts, including the one that ended the run.
    pub failures: u32,
    /// Current or final status.
    pub status: RunStatus,
    /// Human-readable cause when the run did not succeed.
    pub error: Option<String>,
}

impl SyncRun {
    /// Creates a run in the `Running` state.
    pub fn begin(source: impl Into<String>, table: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: None,
            source: source.into(),
            table: table.into(),
            started_at,
            finished_at: None,
            duration_ms: 0,
            records_upserted: 0,
            pages_fetched: 0,
            retries: 0,
            failures: 0,
            status: RunStatus::Running,
            error: None,
        }
    }

    /// Returns true if the run succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// One-line summary for operators.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} -> {}: {} ({} records, {} pages, {} retries, {} ms)",
            self.source,
            self.table,
            self.status,
            self.records_upserted,
            self.pages_fetched,
            self.retries,
            self.duration_ms
        );
        if let Some(error) = &self.error {
            line.push_str(": ");
            line.push_str(error);
        }
        line
    }
}

/// Row count and freshness of a stored table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name.
    pub table: String,
    /// Number of rows.
    pub row_count: u64,
    /// Last time a sync of this table completed.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Newest `last_modified` among the rows.
    pub last_modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn failure_status_depends_on_progress() {
        assert_eq!(RunStatus::for_failure(0), RunStatus::Failed);
        assert_eq!(RunStatus::for_failure(50), RunStatus::Partial);
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Partial.is_terminal());
    }

    #[test]
    fn summary_includes_error() {
        let mut run = SyncRun::begin("calendly", "calendly_events", Utc::now());
        run.status = RunStatus::Failed;
        run.error = Some("HTTP 401".into());
        let line = run.summary();
        assert!(line.starts_with("calendly -> calendly_events: failed"));
        assert!(line.ends_with(": HTTP 401"));
    }
}
