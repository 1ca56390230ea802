//! HTTP plumbing shared by the remote adapters.
//!
//! Maps HTTP outcomes onto [`RemoteError`] so every adapter classifies
//! failures the same way: network trouble, timeouts, 408, 429 and 5xx are
//! transient; any other 4xx and undecodable bodies are fatal.

use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest `Retry-After` honored.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest error body kept in messages.
const MAX_BODY_SNIPPET: usize = 200;

/// Builds the HTTP client used by an adapter.
///
/// # Errors
///
/// Returns [`SyncError::Config`] if the TLS backend cannot be initialized.
pub fn build_client(timeout: Duration) -> SyncResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("boardsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))
}

/// Returns true if a response with this status should be retried.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Classifies a response status. 2xx passes; anything else becomes a
/// [`RemoteError`] whose message quotes the start of `body`.
///
/// # Errors
///
/// Returns a transient error for 408, 429 and 5xx, a fatal one otherwise.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> RemoteResult<()> {
    if status.is_success() {
        return Ok(());
    }

    let message = format!("HTTP {}: {}", status.as_u16(), snippet(body));
    if is_transient_status(status) {
        Err(RemoteError::Transient {
            message,
            status: Some(status.as_u16()),
            retry_after: retry_after(headers),
        })
    } else {
        Err(RemoteError::Fatal {
            message,
            status: Some(status.as_u16()),
        })
    }
}

/// Classifies a transport-level failure.
pub fn request_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RemoteError::transient(format!("request failed: {err}"))
    } else if err.is_decode() || err.is_body() {
        RemoteError::fatal(format!("malformed response: {err}"))
    } else if let Some(Err(classified)) = err
        .status()
        .map(|status| classify_status(status, &HeaderMap::new(), &err.to_string()))
    {
        classified
    } else {
        RemoteError::transient(format!("request failed: {err}"))
    }
}

/// Reads a JSON body from a response, mapping failures to [`RemoteError`].
pub async fn read_json<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &headers, &body)
            .err()
            .unwrap_or_else(|| RemoteError::fatal(format!("HTTP {status}"))));
    }

    let bytes = response.bytes().await.map_err(|e| request_error(&e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RemoteError::fatal(format!("malformed response body: {e}")))
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "(empty body)".to_string();
    }
    match body.char_indices().nth(MAX_BODY_SNIPPET) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
