//! YAML configuration for the `boardsync` tool.
//!
//! ```yaml
//! database:
//!   path: data/boards.db
//! retry:
//!   max_attempts: 3
//!   initial_delay_ms: 500
//! sync:
//!   run_timeout_secs: 600
//!   max_pages: 100
//! sources:
//!   - name: monday_sales
//!     kind: monday
//!     table: sales_board
//!     token_env: MONDAY_API_TOKEN
//!     board_id: 1234567890
//!     page_limit: 200
//!   - name: calendly
//!     kind: calendly
//!     table: calendly_events
//!     token_env: CALENDLY_API_KEY
//!     event_type: "Let's Chat"
//!     min_start_time: 2025-01-01T00:00:00Z
//! ```

use boardsync_engine::{
    CalendlyConfig, CalendlyEventsSource, MondayBoardSource, MondayConfig, RemoteSource,
    RetryConfig, SourceRegistry, SyncConfig, SyncError, SyncOrchestrator,
};
use boardsync_store::validate_table_name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "boardsync.yaml";

/// Database file used when neither the config nor `--db` names one.
pub const DEFAULT_DATABASE_PATH: &str = "boardsync.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("source {source_name}: environment variable {var} is not set")]
    MissingToken { source_name: String, var: String },
    #[error("source {source_name}: set either token or token_env")]
    NoToken { source_name: String },
    #[error(transparent)]
    Source(#[from] SyncError),
}

/// The whole config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: DatabaseSection,
    pub retry: RetrySection,
    pub sync: SyncSection,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: millis(defaults.initial_delay),
            max_delay_ms: millis(defaults.max_delay),
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: defaults.add_jitter,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    /// Zero disables the run timeout.
    pub run_timeout_secs: u64,
    pub max_pages: u32,
}

impl Default for SyncSection {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            run_timeout_secs: defaults.run_timeout.map_or(0, |t| t.as_secs()),
            max_pages: defaults.max_pages,
        }
    }
}

/// One source and the table it syncs into.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Monday {
        #[serde(deserialize_with = "string_or_number")]
        board_id: String,
        #[serde(default)]
        page_limit: Option<u32>,
    },
    Calendly {
        #[serde(default)]
        event_type: Option<String>,
        #[serde(default)]
        min_start_time: Option<DateTime<Utc>>,
        #[serde(default)]
        lookahead_days: Option<u32>,
    },
}

impl AppConfig {
    /// Loads and validates the config at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Loads `path` if given, else the default file if it exists, else the
    /// built-in defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    /// Parses and validates a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut tables = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid("source name is empty".into()));
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate source {}", source.name)));
            }
            validate_table_name(&source.table)
                .map_err(|e| ConfigError::Invalid(format!("source {}: {e}", source.name)))?;
            if !tables.insert(source.table.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "table {} is used by more than one source",
                    source.table
                )));
            }
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.backoff_multiplier must be at least 1".into()));
        }
        if self.sync.max_pages == 0 {
            return Err(ConfigError::Invalid("sync.max_pages must be positive".into()));
        }
        Ok(())
    }

    /// Engine settings from the `retry` and `sync` sections.
    pub fn sync_config(&self) -> SyncConfig {
        let retry = RetryConfig::new(self.retry.max_attempts)
            .with_initial_delay(Duration::from_millis(self.retry.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_backoff_multiplier(self.retry.backoff_multiplier)
            .with_jitter(self.retry.jitter);
        let run_timeout = (self.sync.run_timeout_secs > 0)
            .then(|| Duration::from_secs(self.sync.run_timeout_secs));

        SyncConfig::new()
            .with_retry(retry)
            .with_run_timeout(run_timeout)
            .with_max_pages(self.sync.max_pages)
    }

    /// Database path, unless overridden on the command line.
    pub fn database_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override.map_or_else(|| self.database.path.clone(), Path::to_path_buf)
    }

    /// Builds every configured source into a registry.
    pub fn build_registry(&self, orchestrator: Arc<SyncOrchestrator>) -> Result<SourceRegistry, ConfigError> {
        let mut registry = SourceRegistry::new(orchestrator);
        for source in &self.sources {
            registry.register(source.build()?, source.table.clone())?;
        }
        Ok(registry)
    }
}

impl SourceConfig {
    /// Returns the API token, reading `token_env` if the token is not inline.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let var = self.token_env.as_ref().ok_or_else(|| ConfigError::NoToken {
            source_name: self.name.clone(),
        })?;
        std::env::var(var).map_err(|_| ConfigError::MissingToken {
            source_name: self.name.clone(),
            var: var.clone(),
        })
    }

    /// Builds the adapter described by this entry.
    pub fn build(&self) -> Result<Arc<dyn RemoteSource>, ConfigError> {
        let token = self.resolve_token()?;
        match &self.kind {
            SourceKind::Monday {
                board_id,
                page_limit,
            } => {
                let mut config = MondayConfig::new(&self.name, token, board_id, &self.table);
                if let Some(limit) = page_limit {
                    config = config.with_page_limit(*limit);
                }
                if let Some(url) = &self.api_url {
                    config = config.with_api_url(url);
                }
                if let Some(secs) = self.request_timeout_secs {
                    config = config.with_request_timeout(Duration::from_secs(secs));
                }
                Ok(Arc::new(MondayBoardSource::new(config)?))
            }
            SourceKind::Calendly {
                event_type,
                min_start_time,
                lookahead_days,
            } => {
                let mut config = CalendlyConfig::new(&self.name, token);
                if let Some(name) = event_type {
                    config = config.with_event_type(name);
                }
                if let Some(at) = min_start_time {
                    config = config.with_min_start_time(*at);
                }
                if let Some(days) = lookahead_days {
                    config = config.with_lookahead(Duration::from_secs(u64::from(*days) * 24 * 60 * 60));
                }
                if let Some(url) = &self.api_url {
                    config = config.with_api_url(url);
                }
                if let Some(secs) = self.request_timeout_secs {
                    config = config.with_request_timeout(Duration::from_secs(secs));
                }
                Ok(Arc::new(CalendlyEventsSource::new(config)?))
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Accepts board ids written either as YAML numbers or strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database:
  path: data/boards.db
retry:
  max_attempts: 5
  initial_delay_ms: 100
  jitter: false
sync:
  run_timeout_secs: 0
  max_pages: 50
sources:
  - name: monday_sales
    kind: monday
    table: sales_board
    token: tok-1
    board_id: 1234567890
    page_limit: 200
  - name: calendly
    kind: calendly
    table: calendly_events
    token_env: BOARDSYNC_TEST_CALENDLY_TOKEN
    event_type: "Let's Chat"
    min_start_time: 2025-01-01T00:00:00Z
"#;

    #[test]
    fn parses_full_config() {
        let config = AppConfig::parse(SAMPLE).unwrap();

        assert_eq!(config.database.path, PathBuf::from("data/boards.db"));
        assert_eq!(config.sources.len(), 2);
        match &config.sources[0].kind {
            SourceKind::Monday {
                board_id,
                page_limit,
            } => {
                assert_eq!(board_id, "1234567890");
                assert_eq!(*page_limit, Some(200));
            }
            other => panic!("expected monday, got {other:?}"),
        }
        match &config.sources[1].kind {
            SourceKind::Calendly {
                event_type,
                min_start_time,
                ..
            } => {
                assert_eq!(event_type.as_deref(), Some("Let's Chat"));
                assert!(min_start_time.is_some());
            }
            other => panic!("expected calendly, got {other:?}"),
        }
    }

    #[test]
    fn sync_settings_map_to_engine_config() {
        let sync = AppConfig::parse(SAMPLE).unwrap().sync_config();

        assert_eq!(sync.retry.max_attempts, 5);
        assert_eq!(sync.retry.initial_delay, Duration::from_millis(100));
        assert!(!sync.retry.add_jitter);
        assert_eq!(sync.run_timeout, None);
        assert_eq!(sync.max_pages, 50);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        let sync = config.sync_config();

        assert!(config.sources.is_empty());
        assert_eq!(config.database.path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(sync.run_timeout, Some(Duration::from_secs(600)));
        assert_eq!(sync.max_pages, 100);
        assert_eq!(sync.retry.max_attempts, 3);
    }

    #[test]
    fn cli_database_path_wins() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.database_path(None), PathBuf::from("data/boards.db"));
        assert_eq!(
            config.database_path(Some(Path::new("other.db"))),
            PathBuf::from("other.db")
        );
    }

    #[test]
    fn rejects_duplicate_sources_and_bad_tables() {
        let dup = r#"
sources:
  - {name: a, kind: monday, table: t1, token: x, board_id: "1"}
  - {name: a, kind: monday, table: t2, token: x, board_id: "2"}
"#;
        assert!(matches!(AppConfig::parse(dup), Err(ConfigError::Invalid(_))));

        let bad_table = r#"
sources:
  - {name: a, kind: monday, table: sync_log, token: x, board_id: "1"}
"#;
        assert!(matches!(AppConfig::parse(bad_table), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_unknown_kind_and_fields() {
        let unknown_kind = "sources:\n  - {name: a, kind: jira, table: t, token: x}\n";
        assert!(matches!(AppConfig::parse(unknown_kind), Err(ConfigError::Yaml(_))));

        let typo = "retry:\n  max_attempt: 3\n";
        assert!(matches!(AppConfig::parse(typo), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn token_resolution() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.sources[0].resolve_token().unwrap(), "tok-1");

        std::env::remove_var("BOARDSYNC_TEST_CALENDLY_TOKEN");
        assert!(matches!(
            config.sources[1].resolve_token(),
            Err(ConfigError::MissingToken { .. })
        ));

        std::env::set_var("BOARDSYNC_TEST_CALENDLY_TOKEN", "tok-2");
        assert_eq!(config.sources[1].resolve_token().unwrap(), "tok-2");
        std::env::remove_var("BOARDSYNC_TEST_CALENDLY_TOKEN");
    }

    #[test]
    fn builds_registry() {
        let yaml = r#"
sources:
  - {name: monday_sales, kind: monday, table: sales_board, token: x, board_id: 42}
  - {name: calendly, kind: calendly, table: calendly_events, token: y}
"#;
        let config = AppConfig::parse(yaml).unwrap();
        let store = Arc::new(boardsync_store::InMemoryStore::new());
        let orchestrator = Arc::new(SyncOrchestrator::new(store, config.sync_config()));

        let registry = config.build_registry(orchestrator).unwrap();
        assert_eq!(registry.names(), ["calendly", "monday_sales"]);
        assert_eq!(registry.get("monday_sales").unwrap().table, "sales_board");
    }

    #[test]
    fn source_without_token_fails_to_build() {
        let yaml = "sources:\n  - {name: a, kind: calendly, table: events}\n";
        let config = AppConfig::parse(yaml).unwrap();
        assert!(matches!(config.sources[0].build(), Err(ConfigError::NoToken { .. })));
    }

    #[test]
    fn out_of_range_lookahead_fails_to_build() {
        let yaml = "sources:\n  - {name: a, kind: calendly, table: events, token: x, lookahead_days: 4294967295}\n";
        let config = AppConfig::parse(yaml).unwrap();
        assert!(matches!(config.sources[0].build(), Err(ConfigError::Source(_))));
    }
}
