//! Calendly scheduled-events adapter.
//!
//! Before the first page the adapter resolves the token's user URI and,
//! when an event type name is configured, every event type carrying that
//! exact name. Both lookups are cached for the lifetime of the adapter.
//! Pages then follow `pagination.next_page_token`, one matching event type
//! after another.

use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::http;
use crate::source::{Page, RemoteSource, SourceCursor};
use async_trait::async_trait;
use boardsync_store::{FieldValue, Record};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Public Calendly API root.
pub const CALENDLY_API_URL: &str = "https://api.calendly.com";

/// Events requested per page. Calendly's maximum.
const PAGE_COUNT: u32 = 100;

/// Most pages of event types read while resolving.
const MAX_EVENT_TYPE_PAGES: usize = 20;

/// Settings for a Calendly events source.
#[derive(Debug, Clone)]
pub struct CalendlyConfig {
    /// Source name used in logs and the sync log.
    pub name: String,
    /// Personal access token, sent as a bearer token.
    pub token: String,
    /// Only events of the event type with exactly this name, if set.
    pub event_type_name: Option<String>,
    /// Earliest event start included, if set.
    pub min_start_time: Option<DateTime<Utc>>,
    /// How far past "now" the window of included events reaches.
    pub lookahead: Duration,
    /// API root.
    pub api_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl CalendlyConfig {
    /// Creates settings with the default endpoint and a 30-day lookahead.
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            event_type_name: None,
            min_start_time: None,
            lookahead: Duration::from_secs(30 * 24 * 60 * 60),
            api_url: CALENDLY_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Restricts the source to one event type.
    pub fn with_event_type(mut self, name: impl Into<String>) -> Self {
        self.event_type_name = Some(name.into());
        self
    }

    /// Sets the earliest event start.
    pub fn with_min_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.min_start_time = Some(at);
        self
    }

    /// Sets the lookahead window.
    pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Points the adapter at another API root.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
struct Resolved {
    user_uri: String,
    /// Matching event types, walked in order. Empty means no filter.
    event_type_uuids: Vec<String>,
}

/// Reads scheduled events of the token's user.
pub struct CalendlyEventsSource {
    config: CalendlyConfig,
    client: Client,
    resolved: OnceCell<Resolved>,
    /// `max_start_time` of the run in progress, fixed on its first page.
    window_end: Mutex<Option<DateTime<Utc>>>,
}

impl CalendlyEventsSource {
    /// Creates the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an empty token, a lookahead that
    /// runs past the representable calendar, or if the HTTP client cannot
    /// be built.
    pub fn new(config: CalendlyConfig) -> SyncResult<Self> {
        if config.token.trim().is_empty() {
            return Err(SyncError::Config(format!("{}: API token is empty", config.name)));
        }
        if window_end_from(Utc::now(), config.lookahead).is_none() {
            return Err(SyncError::Config(format!(
                "{}: lookahead of {:?} is out of range",
                config.name, config.lookahead
            )));
        }
        let client = http::build_client(config.request_timeout)?;
        Ok(Self {
            config,
            client,
            resolved: OnceCell::new(),
            window_end: Mutex::new(None),
        })
    }

    /// Returns the settings.
    pub fn config(&self) -> &CalendlyConfig {
        &self.config
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> RemoteResult<T> {
        let response = self
            .client
            .get(format!("{}{path}", self.config.api_url))
            .bearer_auth(&self.config.token)
            .query(query)
            .send()
            .await
            .map_err(|e| http::request_error(&e))?;
        http::read_json(response).await
    }

    async fn resolve(&self) -> RemoteResult<&Resolved> {
        self.resolved
            .get_or_try_init(|| async {
                let me: UserReply = self.get("/users/me", &[]).await?;
                let user_uri = me.resource.uri;

                let event_type_uuids = match &self.config.event_type_name {
                    None => Vec::new(),
                    Some(wanted) => self.matching_event_types(&user_uri, wanted).await?,
                };

                tracing::debug!(
                    source = %self.config.name,
                    user = %user_uri,
                    event_types = ?event_type_uuids,
                    "resolved calendly user"
                );
                Ok::<_, RemoteError>(Resolved {
                    user_uri,
                    event_type_uuids,
                })
            })
            .await
    }

    /// Lists every event type of `user_uri` and keeps those named `wanted`.
    async fn matching_event_types(&self, user_uri: &str, wanted: &str) -> RemoteResult<Vec<String>> {
        let mut uuids = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_EVENT_TYPE_PAGES {
            let mut query = vec![("user", user_uri.to_string()), ("count", PAGE_COUNT.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("page_token", token));
            }
            let types: Collection<EventType> = self.get("/event_types", &query).await?;
            uuids.extend(
                types
                    .collection
                    .iter()
                    .filter(|t| t.name == wanted)
                    .map(|t| last_segment(&t.uri).to_string()),
            );

            page_token = types.next_page_token();
            if page_token.is_none() {
                if uuids.is_empty() {
                    return Err(RemoteError::fatal(format!("no event type named {wanted:?}")));
                }
                return Ok(uuids);
            }
        }

        Err(RemoteError::fatal(format!(
            "more than {MAX_EVENT_TYPE_PAGES} pages of event types"
        )))
    }

    fn window_end(&self, first_page: bool) -> RemoteResult<DateTime<Utc>> {
        let mut slot = self.window_end.lock();
        match *slot {
            Some(end) if !first_page => Ok(end),
            _ => {
                let end = window_end_from(Utc::now(), self.config.lookahead).ok_or_else(|| {
                    RemoteError::fatal(format!("lookahead of {:?} is out of range", self.config.lookahead))
                })?;
                *slot = Some(end);
                Ok(end)
            }
        }
    }
}

#[async_trait]
impl RemoteSource for CalendlyEventsSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch_page(&self, cursor: Option<&SourceCursor>) -> RemoteResult<Page> {
        let (segment, page_token) = match cursor {
            None => (0, None),
            Some(SourceCursor::Token(token)) => (0, Some(token.clone())),
            Some(SourceCursor::Segment { segment, token }) => (*segment, token.clone()),
            Some(other) => {
                return Err(RemoteError::fatal(format!(
                    "calendly events paginate by token, got {other}"
                )));
            }
        };

        let resolved = self.resolve().await?;
        let event_type = match resolved.event_type_uuids.get(segment) {
            Some(uuid) => Some(uuid.clone()),
            None if segment == 0 && resolved.event_type_uuids.is_empty() => None,
            None => {
                return Err(RemoteError::fatal(format!(
                    "cursor names event type #{segment} of {}",
                    resolved.event_type_uuids.len()
                )));
            }
        };
        let window_end = self.window_end(cursor.is_none())?;

        let mut query = vec![
            ("user", resolved.user_uri.clone()),
            ("count", PAGE_COUNT.to_string()),
            ("max_start_time", format_time(window_end)),
        ];
        if let Some(uuid) = event_type {
            query.push(("event_type", uuid));
        }
        if let Some(min) = self.config.min_start_time {
            query.push(("min_start_time", format_time(min)));
        }
        if let Some(token) = page_token {
            query.push(("page_token", token));
        }

        let reply: Collection<Event> = self.get("/scheduled_events", &query).await?;
        let next_cursor = match reply.next_page_token() {
            Some(token) if segment == 0 => Some(SourceCursor::Token(token)),
            Some(token) => Some(SourceCursor::Segment {
                segment,
                token: Some(token),
            }),
            None if segment + 1 < resolved.event_type_uuids.len() => Some(SourceCursor::Segment {
                segment: segment + 1,
                token: None,
            }),
            None => None,
        };
        let records = reply.collection.into_iter().map(Event::into_record).collect();

        Ok(Page::new(records, next_cursor))
    }
}

/// End of the event window, or `None` past the last representable date.
fn window_end_from(now: DateTime<Utc>, lookahead: Duration) -> Option<DateTime<Utc>> {
    let lookahead = chrono::Duration::from_std(lookahead).ok()?;
    now.checked_add_signed(lookahead)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn last_segment(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

fn time_field(raw: Option<String>) -> FieldValue {
    match raw {
        Some(raw) => parse_timestamp(&raw).map_or(FieldValue::Text(raw), FieldValue::Timestamp),
        None => FieldValue::Null,
    }
}

#[derive(Debug, Deserialize)]
struct UserReply {
    resource: UserResource,
}

#[derive(Debug, Deserialize)]
struct UserResource {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    collection: Vec<T>,
    pagination: Option<Pagination>,
}

impl<T> Collection<T> {
    fn next_page_token(&self) -> Option<String> {
        self.pagination
            .as_ref()
            .and_then(|p| p.next_page_token.clone())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventType {
    uri: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Event {
    uri: String,
    name: Option<String>,
    status: Option<String>,
    event_type: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    invitees: Vec<Invitee>,
}

#[derive(Debug, Deserialize)]
struct Invitee {
    name: Option<String>,
    email: Option<String>,
}

impl Event {
    fn into_record(self) -> Record {
        let mut record = Record::new(self.uri)
            .with_field("name", FieldValue::text_or_null(self.name))
            .with_field("status", FieldValue::text_or_null(self.status))
            .with_field("event_type", FieldValue::text_or_null(self.event_type))
            .with_field("start_time", time_field(self.start_time))
            .with_field("end_time", time_field(self.end_time));

        if let Some(invitee) = self.invitees.into_iter().next() {
            record = record
                .with_field("invitee_name", FieldValue::text_or_null(invitee.name))
                .with_field("invitee_email", FieldValue::text_or_null(invitee.email));
        }
        record.last_modified = self.updated_at.as_deref().and_then(parse_timestamp);
        record
    }
}
