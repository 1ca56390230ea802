//! Sync command implementation.

use crate::config::AppConfig;
use boardsync_engine::{SourceRegistry, SyncOrchestrator, SyncResult};
use boardsync_store::{SqliteStore, SyncRun};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Runs the sync command.
///
/// Prints one line per source and fails if any run did not succeed.
pub fn run(
    config: &AppConfig,
    db: &Path,
    sources: &[String],
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.sources.is_empty() {
        return Err("No sources configured".into());
    }

    let store = Arc::new(SqliteStore::open(db)?);
    let orchestrator = Arc::new(SyncOrchestrator::new(store, config.sync_config()));
    let registry = config.build_registry(orchestrator)?;
    tracing::info!(
        database = %db.display(),
        sources = config.sources.len(),
        requested = if all { "all" } else { "named" },
        "starting sync"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let results = runtime.block_on(execute(&registry, sources, all));

    let failed = report(&mut std::io::stdout().lock(), &results)?;
    if failed > 0 {
        return Err(format!("{failed} of {} runs did not succeed", results.len()).into());
    }
    Ok(())
}

/// Syncs the named sources one after another, or all of them concurrently.
async fn execute(
    registry: &SourceRegistry,
    sources: &[String],
    all: bool,
) -> Vec<(String, SyncResult<SyncRun>)> {
    if all {
        return registry.sync_all().await;
    }
    let mut results = Vec::with_capacity(sources.len());
    for name in sources {
        results.push((name.clone(), registry.sync(name).await));
    }
    results
}

/// Writes one line per result and returns how many did not succeed.
fn report<W: Write>(out: &mut W, results: &[(String, SyncResult<SyncRun>)]) -> std::io::Result<usize> {
    let mut failed = 0;
    for (name, result) in results {
        match result {
            Ok(run) => {
                if !run.is_success() {
                    failed += 1;
                }
                tracing::debug!(source = %name, status = %run.status, "run reported");
                writeln!(out, "{}", run.summary())?;
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(source = %name, error = %e, "sync did not run");
                writeln!(out, "{name}: {e}")?;
            }
        }
    }
    Ok(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardsync_engine::{SyncError, SyncState};
    use boardsync_store::{RunStatus, UpsertStore};
    use chrono::Utc;

    fn finished(source: &str, status: RunStatus) -> SyncRun {
        let mut run = SyncRun::begin(source, "t", Utc::now());
        run.status = status;
        run
    }

    #[test]
    fn report_counts_failures() {
        let results = vec![
            ("a".to_string(), Ok(finished("a", RunStatus::Success))),
            ("b".to_string(), Ok(finished("b", RunStatus::Partial))),
            ("c".to_string(), Err(SyncError::UnknownSource("c".into()))),
        ];
        let mut out = Vec::new();

        let failed = report(&mut out, &results).unwrap();

        assert_eq!(failed, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("a -> t: success"));
        assert!(text.contains("b -> t: partial"));
        assert!(text.contains("c: unknown source: c"));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn report_logs_runs_that_did_not_start() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        let results = vec![
            ("a".to_string(), Ok(finished("a", RunStatus::Success))),
            ("c".to_string(), Err(SyncError::UnknownSource("c".into()))),
        ];

        tracing::subscriber::with_default(subscriber, || {
            report(&mut Vec::new(), &results).unwrap();
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("run reported"));
        assert!(logs.contains("sync did not run"));
        assert!(logs.contains("unknown source: c"));
    }

    #[test]
    fn unknown_source_is_reported_not_synced() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::parse(
            "sources:\n  - {name: cal, kind: calendly, table: events, token: x, api_url: \"http://127.0.0.1:9\"}\n",
        )
        .unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("db.sqlite")).unwrap());
        let orchestrator = Arc::new(SyncOrchestrator::new(store.clone(), config.sync_config()));
        let registry = config.build_registry(orchestrator.clone()).unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let results = runtime.block_on(execute(&registry, &["nope".to_string()], false));

        assert!(matches!(results[0].1, Err(SyncError::UnknownSource(_))));
        assert_eq!(orchestrator.state("cal"), SyncState::Idle);
        assert!(store.recent_runs(5).unwrap().is_empty());
    }
}
