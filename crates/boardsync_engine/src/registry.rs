//! Named sources bound to their destination tables.

use crate::error::{SyncError, SyncResult};
use crate::source::RemoteSource;
use crate::state::SyncOrchestrator;
use boardsync_store::{validate_table_name, SyncRun};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A registered source and the table it syncs into.
#[derive(Clone)]
pub struct Binding {
    /// The adapter.
    pub source: Arc<dyn RemoteSource>,
    /// Destination table.
    pub table: String,
}

/// Sources by name, synced through one orchestrator.
///
/// # Example
///
/// ```rust
/// use boardsync_engine::{SourceRegistry, StaticSource, SyncConfig, SyncOrchestrator};
/// use boardsync_store::{InMemoryStore, Record};
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let orchestrator = SyncOrchestrator::new(Arc::new(InMemoryStore::new()), SyncConfig::default());
/// let mut registry = SourceRegistry::new(Arc::new(orchestrator));
/// registry
///     .register(Arc::new(StaticSource::new("demo", vec![Record::new("a")], 10)), "demo_items")
///     .unwrap();
///
/// let run = registry.sync("demo").await.unwrap();
/// assert!(run.is_success());
/// # });
/// ```
pub struct SourceRegistry {
    orchestrator: Arc<SyncOrchestrator>,
    bindings: BTreeMap<String, Binding>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            bindings: BTreeMap::new(),
        }
    }

    /// Gets the orchestrator.
    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    /// Binds `source` to `table` under the source's name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the name is taken, or
    /// [`SyncError::Storage`] if the table name is invalid.
    pub fn register(&mut self, source: Arc<dyn RemoteSource>, table: impl Into<String>) -> SyncResult<()> {
        let table = table.into();
        validate_table_name(&table)?;

        let name = source.name().to_string();
        if self.bindings.contains_key(&name) {
            return Err(SyncError::Config(format!("source {name} is registered twice")));
        }
        self.bindings.insert(name, Binding { source, table });
        Ok(())
    }

    /// Registered source names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.bindings.keys().map(String::as_str).collect()
    }

    /// Looks up a binding.
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Returns true if no source is registered.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Syncs the source registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownSource`] for an unregistered name and
    /// [`SyncError::AlreadyRunning`] if the source is mid-run.
    pub async fn sync(&self, name: &str) -> SyncResult<SyncRun> {
        let binding = self
            .bindings
            .get(name)
            .ok_or_else(|| SyncError::UnknownSource(name.to_string()))?;
        self.orchestrator.run(binding.source.as_ref(), &binding.table).await
    }

    /// Syncs every registered source concurrently.
    ///
    /// Each source runs as its own task and pipeline; one failing source
    /// does not stop the others. Results are sorted by source name.
    pub async fn sync_all(&self) -> Vec<(String, SyncResult<SyncRun>)> {
        let mut tasks = JoinSet::new();
        for (name, binding) in &self.bindings {
            let orchestrator = Arc::clone(&self.orchestrator);
            let binding = binding.clone();
            let name = name.clone();
            tasks.spawn(async move {
                let result = orchestrator.run(binding.source.as_ref(), &binding.table).await;
                (name, result)
            });
        }

        let mut results = Vec::with_capacity(self.bindings.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "sync task aborted"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}
