//! Retry with exponential backoff around remote calls.

use crate::config::RetryConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use std::future::Future;

/// A value produced by a retried operation, with the number of attempts it
/// took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    /// The successful result.
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Wraps remote calls with bounded exponential backoff.
///
/// Only [`RemoteError::Transient`] failures are retried. A fatal failure
/// ends the call after the attempt that produced it.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from its configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails fatally, or runs out of
    /// attempts.
    ///
    /// `source_name` labels errors and log lines.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Remote`] on the first fatal failure
    /// - [`SyncError::RetriesExhausted`] when every attempt failed transiently
    pub async fn execute<T, F, Fut>(&self, source_name: &str, operation: F) -> SyncResult<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut retries = 0;
        self.execute_counting(source_name, &mut retries, operation).await
    }

    /// Like [`RetryPolicy::execute`], but adds each retry to `retries` as
    /// soon as it is scheduled. The count therefore includes retries made
    /// before a fatal failure, and survives the future being dropped.
    ///
    /// # Errors
    ///
    /// Same as [`RetryPolicy::execute`].
    pub async fn execute_counting<T, F, Fut>(
        &self,
        source_name: &str,
        retries: &mut u32,
        mut operation: F,
    ) -> SyncResult<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt + 1,
                    })
                }
                Err(cause) if !cause.is_transient() => {
                    return Err(SyncError::Remote {
                        source_name: source_name.to_string(),
                        cause,
                    });
                }
                Err(cause) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(SyncError::RetriesExhausted {
                            source_name: source_name.to_string(),
                            attempts: attempt,
                            cause,
                        });
                    }

                    let mut delay = self.config.delay_for_attempt(attempt);
                    if let Some(requested) = cause.retry_after() {
                        delay = delay.max(requested.min(self.config.max_delay));
                    }
                    *retries += 1;
                    tracing::warn!(
                        source = source_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
