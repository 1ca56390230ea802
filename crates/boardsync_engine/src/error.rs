//! Error types for the sync engine.

use boardsync_store::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote source calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A failed call to a remote API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Worth retrying: network failure, timeout, rate limit, server error.
    #[error("transient remote error: {message}")]
    Transient {
        /// Error message.
        message: String,
        /// HTTP status, when the server answered.
        status: Option<u16>,
        /// Minimum wait requested by the server (`Retry-After`).
        retry_after: Option<Duration>,
    },

    /// Not worth retrying: bad credentials, unknown resource, malformed
    /// request or response.
    #[error("fatal remote error: {message}")]
    Fatal {
        /// Error message.
        message: String,
        /// HTTP status, when the server answered.
        status: Option<u16>,
    },
}

impl RemoteError {
    /// Creates a transient error without a status.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Creates a fatal error without a status.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            status: None,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }

    /// Returns the HTTP status, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Transient { status, .. } | RemoteError::Fatal { status, .. } => *status,
        }
    }

    /// Returns the server-requested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Transient { retry_after, .. } => *retry_after,
            RemoteError::Fatal { .. } => None,
        }
    }
}

/// Errors that end a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The source failed with a non-retryable error.
    #[error("{source_name}: {cause}")]
    Remote {
        /// Source name.
        source_name: String,
        /// The remote failure.
        cause: RemoteError,
    },

    /// Every attempt failed with a transient error.
    #[error("{source_name}: gave up after {attempts} attempts: {cause}")]
    RetriesExhausted {
        /// Source name.
        source_name: String,
        /// Attempts made.
        attempts: u32,
        /// The last failure.
        cause: RemoteError,
    },

    /// The local store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The run exceeded its time budget.
    #[error("{source_name}: run timed out after {after:?}")]
    Timeout {
        /// Source name.
        source_name: String,
        /// Configured time budget.
        after: Duration,
    },

    /// The source kept returning pages past the configured limit.
    #[error("{source_name}: more than {max_pages} pages")]
    PageLimit {
        /// Source name.
        source_name: String,
        /// Configured page limit.
        max_pages: u32,
    },

    /// A run for this source is already in progress.
    #[error("sync already running for {0}")]
    AlreadyRunning(String),

    /// No source is registered under this name.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// A source could not be built from its settings.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Returns the remote failure behind this error, if any.
    pub fn remote_cause(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote { cause, .. } | SyncError::RetriesExhausted { cause, .. } => {
                Some(cause)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_fatal() {
        assert!(RemoteError::transient("connection reset").is_transient());
        assert!(!RemoteError::fatal("401 unauthorized").is_transient());
        assert_eq!(RemoteError::fatal("x").retry_after(), None);
    }

    #[test]
    fn status_is_exposed() {
        let err = RemoteError::Fatal {
            message: "not found".into(),
            status: Some(404),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(RemoteError::transient("timeout").status(), None);
    }

    #[test]
    fn sync_error_display() {
        let err = SyncError::RetriesExhausted {
            source_name: "calendly".into(),
            attempts: 3,
            cause: RemoteError::transient("HTTP 503"),
        };
        assert_eq!(
            err.to_string(),
            "calendly: gave up after 3 attempts: transient remote error: HTTP 503"
        );
        assert!(err.remote_cause().is_some());

        let err = SyncError::AlreadyRunning("monday_sales".into());
        assert_eq!(err.to_string(), "sync already running for monday_sales");
        assert!(err.remote_cause().is_none());
    }
}
