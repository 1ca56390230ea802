//! Status command implementation.

use boardsync_store::{SyncRun, TableInfo, UpsertStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Database status report.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Database path.
    pub path: String,
    /// One entry per mirrored table.
    pub tables: Vec<TableInfo>,
    /// Most recent runs, newest first.
    pub runs: Vec<SyncRun>,
}

/// Runs the status command.
pub fn run(db: &Path, runs: usize, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_existing(db)?;
    let report = collect(&store, db, runs)?;

    let mut out = std::io::stdout().lock();
    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        _ => write_text(&mut out, &report)?,
    }
    Ok(())
}

fn collect(store: &dyn UpsertStore, db: &Path, runs: usize) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let mut tables = Vec::new();
    for table in store.tables()? {
        tables.push(store.table_info(&table)?);
    }
    Ok(StatusReport {
        path: db.display().to_string(),
        tables,
        runs: store.recent_runs(runs)?,
    })
}

fn write_text<W: Write>(out: &mut W, report: &StatusReport) -> std::io::Result<()> {
    writeln!(out, "Database: {}", report.path)?;
    writeln!(out)?;

    writeln!(out, "Tables:")?;
    if report.tables.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for info in &report.tables {
        writeln!(
            out,
            "  {:<28} {:>8} rows  synced {}  modified {}",
            info.table,
            info.row_count,
            format_time(info.last_synced_at),
            format_time(info.last_modified)
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Recent runs:")?;
    if report.runs.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for run in &report.runs {
        writeln!(out, "  [{}] {}", format_time(Some(run.started_at)), run.summary())?;
    }
    Ok(())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}
