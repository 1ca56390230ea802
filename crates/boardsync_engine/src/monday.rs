//! Monday.com board adapter.
//!
//! Pages through `items_page` of one board over the GraphQL API. The API
//! hands back an opaque cursor; an empty or missing cursor ends the board.

use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::http;
use crate::source::{Page, RemoteSource, SourceCursor};
use async_trait::async_trait;
use boardsync_store::{FieldValue, Record};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Public Monday.com GraphQL endpoint.
pub const MONDAY_API_URL: &str = "https://api.monday.com/v2";

/// Items requested per page unless configured otherwise.
pub const DEFAULT_PAGE_LIMIT: u32 = 500;

/// Largest page Monday.com serves.
const MAX_PAGE_LIMIT: u32 = 500;

const ITEMS_QUERY: &str = "query ($board: [ID!], $limit: Int!, $cursor: String) { \
    boards(ids: $board) { items_page(limit: $limit, cursor: $cursor) { \
    cursor items { id name updated_at column_values { id text type } } } } }";

/// Error codes Monday.com uses for budget and rate limits. These clear up
/// on their own, so they are retried.
const TRANSIENT_CODES: &[&str] = &[
    "ComplexityException",
    "COMPLEXITY_BUDGET_EXHAUSTED",
    "RATE_LIMIT_EXCEEDED",
    "RateLimitExceeded",
    "maxConcurrencyExceeded",
    "DAILY_LIMIT_EXCEEDED",
    "INTERNAL_SERVER_ERROR",
];

/// Settings for one Monday.com board.
#[derive(Debug, Clone)]
pub struct MondayConfig {
    /// Source name used in logs and the sync log.
    pub name: String,
    /// API token, sent as-is in the `Authorization` header.
    pub token: String,
    /// Numeric board id.
    pub board_id: String,
    /// Value of the `board_type` field on every record.
    pub board_type: String,
    /// Items per page, at most 500.
    pub page_limit: u32,
    /// GraphQL endpoint.
    pub api_url: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl MondayConfig {
    /// Creates settings with the default endpoint and page size.
    pub fn new(
        name: impl Into<String>,
        token: impl Into<String>,
        board_id: impl Into<String>,
        board_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            board_id: board_id.into(),
            board_type: board_type.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            api_url: MONDAY_API_URL.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Sets the page size.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit;
        self
    }

    /// Points the adapter at another endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Reads the items of one Monday.com board.
pub struct MondayBoardSource {
    config: MondayConfig,
    client: Client,
}

impl MondayBoardSource {
    /// Creates the adapter.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for a non-numeric board id, an empty
    /// token or a page limit outside `1..=500`.
    pub fn new(config: MondayConfig) -> SyncResult<Self> {
        if config.board_id.is_empty() || !config.board_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SyncError::Config(format!(
                "{}: board id must be numeric, got {:?}",
                config.name, config.board_id
            )));
        }
        if config.token.trim().is_empty() {
            return Err(SyncError::Config(format!("{}: API token is empty", config.name)));
        }
        if config.page_limit == 0 || config.page_limit > MAX_PAGE_LIMIT {
            return Err(SyncError::Config(format!(
                "{}: page limit must be between 1 and {MAX_PAGE_LIMIT}",
                config.name
            )));
        }

        let client = http::build_client(config.request_timeout)?;
        Ok(Self { config, client })
    }

    /// Returns the settings.
    pub fn config(&self) -> &MondayConfig {
        &self.config
    }

    fn to_record(&self, item: Item) -> Record {
        let mut record = Record::new(item.id)
            .with_field("name", item.name)
            .with_field("board_type", self.config.board_type.as_str());
        for column in item.column_values {
            let value = column_value(column.kind.as_deref(), column.text);
            record.fields.insert(column.id, value);
        }
        record.last_modified = item.updated_at.as_deref().and_then(parse_timestamp);
        record
    }
}

#[async_trait]
impl RemoteSource for MondayBoardSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch_page(&self, cursor: Option<&SourceCursor>) -> RemoteResult<Page> {
        let cursor = match cursor {
            None => None,
            Some(SourceCursor::Token(token)) => Some(token.as_str()),
            Some(other) => {
                return Err(RemoteError::fatal(format!(
                    "monday boards paginate by token, got {other}"
                )));
            }
        };

        let body = json!({
            "query": ITEMS_QUERY,
            "variables": {
                "board": [self.config.board_id],
                "limit": self.config.page_limit,
                "cursor": cursor,
            }
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .header(AUTHORIZATION, &self.config.token)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| http::request_error(&e))?;

        let reply: GraphqlReply = http::read_json(response).await?;
        reply.check()?;

        let Some(board) = reply.data.and_then(|d| d.boards.into_iter().next()) else {
            tracing::debug!(source = %self.config.name, board = %self.config.board_id, "board not found");
            return Ok(Page::exhausted());
        };

        let next_cursor = board
            .items_page
            .cursor
            .filter(|c| !c.is_empty())
            .map(SourceCursor::Token);
        let records = board
            .items_page
            .items
            .into_iter()
            .map(|item| self.to_record(item))
            .collect();

        Ok(Page::new(records, next_cursor))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

/// Types a column from its display text.
///
/// Number and date columns become numbers and timestamps when their text
/// parses; everything else, status labels included, stays text.
fn column_value(kind: Option<&str>, text: Option<String>) -> FieldValue {
    let Some(text) = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
        return FieldValue::Null;
    };
    let typed = match kind {
        Some("numbers" | "numeric") => parse_number(&text),
        Some("date") => parse_date(&text).map(FieldValue::Timestamp),
        _ => None,
    };
    typed.unwrap_or(FieldValue::Text(text))
}

fn parse_number(text: &str) -> Option<FieldValue> {
    let plain = text.replace(',', "");
    if let Ok(n) = plain.parse::<i64>() {
        return Some(FieldValue::Integer(n));
    }
    plain
        .parse::<f64>()
        .ok()
        .filter(|x| x.is_finite())
        .map(FieldValue::Float)
}

/// Date columns read `2024-03-01`, or `2024-03-01 14:30` with a time.
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Some(at) = parse_timestamp(text) {
        return Some(at);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, format) {
            return Some(at.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc())
}

#[derive(Debug, Deserialize)]
struct GraphqlReply {
    data: Option<BoardsData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl GraphqlReply {
    /// Turns GraphQL-level errors into a [`RemoteError`].
    fn check(&self) -> RemoteResult<()> {
        if let Some(code) = &self.error_code {
            let message = self.error_message.clone().unwrap_or_default();
            return Err(graphql_error(code, &message));
        }
        match self.errors.first() {
            None => Ok(()),
            Some(first) => {
                let code = first
                    .extensions
                    .as_ref()
                    .and_then(|e| e.code.as_deref())
                    .unwrap_or("");
                Err(graphql_error(code, &first.message))
            }
        }
    }
}

fn graphql_error(code: &str, message: &str) -> RemoteError {
    let text = if code.is_empty() {
        format!("graphql error: {message}")
    } else {
        format!("graphql error {code}: {message}")
    };
    if TRANSIENT_CODES.contains(&code) {
        RemoteError::transient(text)
    } else {
        RemoteError::fatal(text)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(default)]
    message: String,
    extensions: Option<ErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct ErrorExtensions {
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoardsData {
    #[serde(default)]
    boards: Vec<Board>,
}

#[derive(Debug, Deserialize)]
struct Board {
    items_page: ItemsPage,
}

#[derive(Debug, Deserialize)]
struct ItemsPage {
    cursor: Option<String>,
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    id: String,
    name: String,
    updated_at: Option<String>,
    #[serde(default)]
    column_values: Vec<ColumnValue>,
}

#[derive(Debug, Deserialize)]
struct ColumnValue {
    id: String,
    text: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> MondayBoardSource {
        let config = MondayConfig::new("monday_sales", "tok-123", "42", "sales_board")
            .with_api_url(server.uri())
            .with_page_limit(2)
            .with_request_timeout(Duration::from_secs(5));
        MondayBoardSource::new(config).unwrap()
    }

    fn items_reply(cursor: Option<&str>, ids: &[&str]) -> serde_json::Value {
        let items: Vec<_> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "name": format!("Item {id}"),
                    "updated_at": "2024-03-01T12:00:00Z",
                    "column_values": [
                        {"id": "status", "text": "Won", "type": "status"},
                        {"id": "notes", "text": "", "type": "text"},
                        {"id": "owner", "text": null, "type": "people"}
                    ]
                })
            })
            .collect();
        json!({"data": {"boards": [{"items_page": {"cursor": cursor, "items": items}}]}})
    }

    #[tokio::test]
    async fn first_page_maps_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "tok-123"))
            .and(body_partial_json(json!({"variables": {"board": ["42"], "limit": 2, "cursor": null}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(items_reply(Some("c1"), &["1", "2"])))
            .expect(1)
            .mount(&server)
            .await;

        let page = source(&server).fetch_page(None).await.unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_cursor, Some(SourceCursor::Token("c1".into())));
        let first = &page.records[0];
        assert_eq!(first.external_id, "1");
        assert_eq!(first.field("name"), Some(&FieldValue::Text("Item 1".into())));
        assert_eq!(first.field("board_type"), Some(&FieldValue::Text("sales_board".into())));
        assert_eq!(first.field("status"), Some(&FieldValue::Text("Won".into())));
        assert_eq!(first.field("notes"), Some(&FieldValue::Null));
        assert_eq!(first.field("owner"), Some(&FieldValue::Null));
        assert_eq!(
            first.last_modified.map(|t| t.to_rfc3339()),
            Some("2024-03-01T12:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn number_and_date_columns_are_typed() {
        let server = MockServer::start().await;
        let reply = json!({"data": {"boards": [{"items_page": {"cursor": null, "items": [{
            "id": "7",
            "name": "Acme",
            "updated_at": "2024-03-01T12:00:00Z",
            "column_values": [
                {"id": "contract_amt", "text": "12,500", "type": "numbers"},
                {"id": "numbers3", "text": "99.5", "type": "numbers"},
                {"id": "date_close", "text": "2024-04-15", "type": "date"},
                {"id": "date_call", "text": "2024-04-16 09:30", "type": "date"},
                {"id": "date_odd", "text": "next week", "type": "date"},
                {"id": "color_lead", "text": "Hot", "type": "status"}
            ]
        }]}}]}});
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .mount(&server)
            .await;

        let page = source(&server).fetch_page(None).await.unwrap();
        let record = &page.records[0];

        assert_eq!(record.field("contract_amt"), Some(&FieldValue::Integer(12_500)));
        assert_eq!(record.field("numbers3"), Some(&FieldValue::Float(99.5)));
        assert_eq!(
            record.field("date_close").map(ToString::to_string),
            Some("2024-04-15T00:00:00+00:00".to_string())
        );
        assert_eq!(
            record.field("date_call").map(ToString::to_string),
            Some("2024-04-16T09:30:00+00:00".to_string())
        );
        assert_eq!(record.field("date_odd"), Some(&FieldValue::Text("next week".into())));
        assert_eq!(record.field("color_lead"), Some(&FieldValue::Text("Hot".into())));
    }

    #[test]
    fn untyped_or_unparseable_columns_stay_text() {
        assert_eq!(column_value(None, Some("12".into())), FieldValue::Text("12".into()));
        assert_eq!(column_value(Some("numbers"), Some("n/a".into())), FieldValue::Text("n/a".into()));
        assert_eq!(column_value(Some("numbers"), Some("inf".into())), FieldValue::Text("inf".into()));
        assert_eq!(column_value(Some("date"), Some("  ".into())), FieldValue::Null);
    }

    #[tokio::test]
    async fn cursor_is_forwarded_and_empty_cursor_ends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"variables": {"cursor": "c1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(items_reply(Some(""), &["3"])))
            .expect(1)
            .mount(&server)
            .await;

        let cursor = SourceCursor::Token("c1".into());
        let page = source(&server).fetch_page(Some(&cursor)).await.unwrap();

        assert_eq!(page.records.len(), 1);
        assert!(page.is_last());
    }

    #[tokio::test]
    async fn missing_board_is_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"boards": []}})))
            .mount(&server)
            .await;

        let page = source(&server).fetch_page(None).await.unwrap();
        assert_eq!(page, Page::exhausted());
    }

    #[tokio::test]
    async fn graphql_errors_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"message": "Field 'itemz' doesn't exist", "extensions": {"code": "undefinedField"}}]
            })))
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(None).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("undefinedField"));
    }

    #[tokio::test]
    async fn complexity_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error_code": "ComplexityException",
                "error_message": "Complexity budget exhausted"
            })))
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(None).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn server_errors_are_transient_and_auth_errors_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "tok-123"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = source(&server).fetch_page(None).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Not Authenticated"))
            .mount(&server)
            .await;
        let err = source(&server).fetch_page(None).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn malformed_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = source(&server).fetch_page(None).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn rejects_bad_settings() {
        let bad_board = MondayConfig::new("m", "tok", "42) { x", "b");
        assert!(matches!(MondayBoardSource::new(bad_board), Err(SyncError::Config(_))));

        let no_token = MondayConfig::new("m", " ", "42", "b");
        assert!(matches!(MondayBoardSource::new(no_token), Err(SyncError::Config(_))));

        let big_page = MondayConfig::new("m", "tok", "42", "b").with_page_limit(501);
        assert!(matches!(MondayBoardSource::new(big_page), Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn offset_cursor_is_rejected() {
        let server = MockServer::start().await;
        let err = source(&server)
            .fetch_page(Some(&SourceCursor::Offset(10)))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
