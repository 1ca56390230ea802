//! Remote source abstraction.

use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use boardsync_store::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Position in a paginated result set.
///
/// Cursors live for one run only. Every run starts from no cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCursor {
    /// Opaque token returned by the API.
    Token(String),
    /// Number of records already returned.
    Offset(u64),
    /// Position within the `segment`-th of several result sets that are
    /// walked one after another.
    Segment {
        /// Index of the result set.
        segment: usize,
        /// Page token within that set; `None` starts it from the top.
        token: Option<String>,
    },
}

impl fmt::Display for SourceCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceCursor::Token(token) => write!(f, "token:{token}"),
            SourceCursor::Offset(offset) => write!(f, "offset:{offset}"),
            SourceCursor::Segment { segment, token } => {
                write!(f, "segment:{segment}:{}", token.as_deref().unwrap_or("start"))
            }
        }
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Records in source order.
    pub records: Vec<Record>,
    /// Cursor for the next page, or `None` when the source is exhausted.
    pub next_cursor: Option<SourceCursor>,
}

impl Page {
    /// Creates a page.
    pub fn new(records: Vec<Record>, next_cursor: Option<SourceCursor>) -> Self {
        Self {
            records,
            next_cursor,
        }
    }

    /// Creates the empty, final page.
    pub fn exhausted() -> Self {
        Self::default()
    }

    /// Returns true if no page follows this one.
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// A paginated remote API.
///
/// This trait abstracts one API's pagination convention and
/// authentication, allowing for different implementations (Monday.com
/// GraphQL, Calendly REST, in-memory for testing, etc.).
///
/// # Contract
///
/// - `fetch_page(None)` starts from the beginning, every time
/// - Each call makes at most one outbound request for the page
/// - A page without `next_cursor` is the last one
/// - Failures are classified as transient or fatal
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Fetches the page at `cursor`, or the first page for `None`.
    async fn fetch_page(&self, cursor: Option<&SourceCursor>) -> RemoteResult<Page>;
}

/// An in-memory source serving fixed pages with offset cursors.
///
/// The cursor is the number of records served before the requested page.
/// Failures can be queued to exercise retry and partial-run handling.
///
/// # Example
///
/// ```rust
/// use boardsync_engine::{RemoteSource, StaticSource};
/// use boardsync_store::Record;
///
/// let source = StaticSource::new("demo", vec![Record::new("a"), Record::new("b")], 1);
/// assert_eq!(source.name(), "demo");
/// assert_eq!(source.page_count(), 2);
/// ```
pub struct StaticSource {
    name: String,
    pages: Vec<Vec<Record>>,
    failures: Mutex<VecDeque<(u64, RemoteError)>>,
    calls: AtomicU32,
}

impl StaticSource {
    /// Creates a source that serves `records` in pages of `page_size`.
    pub fn new(name: impl Into<String>, records: Vec<Record>, page_size: usize) -> Self {
        let pages = records.chunks(page_size.max(1)).map(<[Record]>::to_vec).collect();
        Self::from_pages(name, pages)
    }

    /// Creates a source from explicit pages, served in order.
    pub fn from_pages(name: impl Into<String>, pages: Vec<Vec<Record>>) -> Self {
        Self {
            name: name.into(),
            pages,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of pages served by a full run.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Queues `error` to be returned the next time the page at `offset`
    /// is requested. Several errors for the same offset are returned in
    /// order.
    pub fn fail_at(&self, offset: u64, error: RemoteError) {
        self.failures.lock().push_back((offset, error));
    }

    /// Number of `fetch_page` calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, cursor: Option<&SourceCursor>) -> RemoteResult<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offset = match cursor {
            None => 0,
            Some(SourceCursor::Offset(offset)) => *offset,
            Some(other) => {
                return Err(RemoteError::fatal(format!("unexpected cursor {other}")));
            }
        };

        {
            let mut failures = self.failures.lock();
            if let Some(pos) = failures.iter().position(|(at, _)| *at == offset) {
                if let Some((_, error)) = failures.remove(pos) {
                    return Err(error);
                }
            }
        }

        let mut served = 0u64;
        for (index, page) in self.pages.iter().enumerate() {
            if served == offset {
                let end = served + page.len() as u64;
                let next_cursor = (index + 1 < self.pages.len()).then_some(SourceCursor::Offset(end));
                return Ok(Page::new(page.clone(), next_cursor));
            }
            served += page.len() as u64;
        }

        if offset == served {
            Ok(Page::exhausted())
        } else {
            Err(RemoteError::fatal(format!("offset {offset} is not a page boundary")))
        }
    }
}
