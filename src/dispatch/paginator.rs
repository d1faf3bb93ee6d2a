//! Lazy traversal of paginated collections
//!
//! A [`Paginator`] turns one collection request into a stream of pages.
//! Page `n + 1` is requested only after page `n` has been decoded and the
//! consumer polls again; every page request goes through the executor, so
//! it is rate-limited and retried like any other call.

use crate::config::ConfigError;
use crate::dispatch::executor::RequestExecutor;
use crate::dispatch::transport::{RawResponse, RequestSpec};
use crate::error::PageError;
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a collection advances from one page to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum Pagination {
    /// Opaque continuation token returned by the server
    Cursor {
        /// Query parameter carrying the cursor
        #[serde(default = "default_cursor_param")]
        cursor_param: String,
        /// Body field holding the items
        #[serde(default = "default_cursor_items_field")]
        items_field: String,
        /// Body field holding the next cursor
        #[serde(default = "default_next_cursor_field")]
        next_cursor_field: Option<String>,
        /// Response header holding the next cursor
        #[serde(default)]
        next_cursor_header: Option<String>,
    },
    /// 1-based page numbers with a total page count
    PageNumber {
        /// Query parameter carrying the page number
        #[serde(default = "default_page_param")]
        page_param: String,
        /// Body field holding the items
        #[serde(default = "default_page_items_field")]
        items_field: String,
        /// Body field holding the total page count
        #[serde(default = "default_total_pages_field")]
        total_pages_field: String,
    },
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::PageNumber {
            page_param: default_page_param(),
            items_field: default_page_items_field(),
            total_pages_field: default_total_pages_field(),
        }
    }
}

fn default_cursor_param() -> String {
    "cursor".to_string()
}

fn default_cursor_items_field() -> String {
    "items".to_string()
}

fn default_next_cursor_field() -> Option<String> {
    Some("next_cursor".to_string())
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_page_items_field() -> String {
    "resources".to_string()
}

fn default_total_pages_field() -> String {
    "total_pages".to_string()
}

impl Pagination {
    /// Reject a scheme that could never reach its second page
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Pagination::Cursor { cursor_param, .. } if cursor_param.is_empty() => Err(
                ConfigError::InvalidValue("cursor_param must not be empty".to_string()),
            ),
            Pagination::Cursor {
                next_cursor_field: None,
                next_cursor_header: None,
                ..
            } => Err(ConfigError::InvalidValue(
                "cursor pagination needs next_cursor_field or next_cursor_header".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Request for the page at `cursor`; `None` is the first page
    pub fn apply_cursor(&self, request: &RequestSpec, cursor: Option<&str>) -> RequestSpec {
        match self {
            Pagination::Cursor { cursor_param, .. } => match cursor {
                Some(cursor) => request.clone().with_query(cursor_param, cursor),
                None => request.clone(),
            },
            Pagination::PageNumber { page_param, .. } => {
                request.clone().with_query(page_param, cursor.unwrap_or("1"))
            }
        }
    }

    /// Decode one page body and work out the following cursor
    ///
    /// A missing items field is a decode error. A next cursor equal to the
    /// current one is rejected so that a misbehaving server cannot loop the
    /// traversal forever.
    pub fn decode(
        &self,
        response: &RawResponse,
        cursor: Option<&str>,
    ) -> Result<Page<Value>, PageError> {
        let body: Value = response
            .json()
            .map_err(|e| PageError::Decode(format!("body is not JSON: {}", e)))?;

        let items = match body.get(self.items_field()) {
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(PageError::Decode(format!(
                    "field '{}' is not an array",
                    self.items_field()
                )))
            }
            None => {
                return Err(PageError::Decode(format!(
                    "missing field '{}'",
                    self.items_field()
                )))
            }
        };

        let next_cursor = match self {
            Pagination::Cursor {
                next_cursor_field,
                next_cursor_header,
                ..
            } => {
                let from_body = next_cursor_field
                    .as_deref()
                    .and_then(|field| body.get(field))
                    .and_then(cursor_string);
                let next = from_body.or_else(|| {
                    next_cursor_header
                        .as_deref()
                        .and_then(|name| response.header(name))
                        .map(str::to_string)
                });
                next.filter(|c| !c.is_empty())
            }
            Pagination::PageNumber {
                total_pages_field, ..
            } => {
                let current = match cursor {
                    Some(raw) => raw.parse::<u64>().map_err(|_| {
                        PageError::Decode(format!("invalid page number '{}'", raw))
                    })?,
                    None => 1,
                };
                let more = match body.get(total_pages_field).and_then(Value::as_u64) {
                    Some(total) => current < total,
                    None => !items.is_empty(),
                };
                more.then(|| (current + 1).to_string())
            }
        };

        if let (Some(next), Some(current)) = (next_cursor.as_deref(), cursor) {
            if next == current {
                return Err(PageError::Decode(format!(
                    "server returned the current cursor '{}' as next",
                    current
                )));
            }
        }

        Ok(Page {
            items,
            cursor: cursor.map(str::to_string),
            next_cursor,
        })
    }

    fn items_field(&self) -> &str {
        match self {
            Pagination::Cursor { items_field, .. } | Pagination::PageNumber { items_field, .. } => {
                items_field
            }
        }
    }
}

fn cursor_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One decoded page
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Items in server order
    pub items: Vec<T>,
    /// Cursor that produced this page; `None` for the first page
    pub cursor: Option<String>,
    /// Cursor of the following page; `None` when this is the last page
    pub next_cursor: Option<String>,
}

impl Page<Value> {
    fn typed<T: DeserializeOwned>(self) -> Result<Page<T>, PageError> {
        let items = self
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| PageError::Decode(format!("invalid item: {}", e)))?;
        Ok(Page {
            items,
            cursor: self.cursor,
            next_cursor: self.next_cursor,
        })
    }
}

enum Progress {
    At(Option<String>),
    Done,
}

/// Lazy page sequence over one collection
pub struct Paginator<T> {
    executor: Arc<RequestExecutor>,
    request: RequestSpec,
    pagination: Pagination,
    start: Option<String>,
    cancel: CancellationToken,
    _item: PhantomData<fn() -> T>,
}

impl<T> Paginator<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Create a paginator starting at the first page
    pub fn new(executor: Arc<RequestExecutor>, request: RequestSpec, pagination: Pagination) -> Self {
        Self {
            executor,
            request,
            pagination,
            start: None,
            cancel: CancellationToken::new(),
            _item: PhantomData,
        }
    }

    /// Resume from a previously returned cursor
    pub fn starting_at(mut self, cursor: impl Into<String>) -> Self {
        self.start = Some(cursor.into());
        self
    }

    /// End the sequence with a cancellation error once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<Page<T>, PageError> {
        let request = self.pagination.apply_cursor(&self.request, cursor);
        let response = self
            .executor
            .execute_with_cancel(&request, &self.cancel)
            .await?;
        let page = self.pagination.decode(&response, cursor)?.typed()?;

        debug!(
            request = %request,
            items = page.items.len(),
            next_cursor = ?page.next_cursor,
            "Fetched page"
        );
        Ok(page)
    }

    /// Stream of pages
    ///
    /// The first error is yielded once and ends the sequence; pages already
    /// yielded stay valid. A cursor that was already fetched in this
    /// traversal is a decode error instead of a second request.
    pub fn into_pages(self) -> impl Stream<Item = Result<Page<T>, PageError>> + Send {
        let start = Progress::At(self.start.clone());
        let seen = HashSet::new();
        stream::unfold((self, start, seen), |(pager, progress, mut seen)| async move {
            let cursor = match progress {
                Progress::At(cursor) => cursor,
                Progress::Done => return None,
            };

            if let Some(cursor) = &cursor {
                if !seen.insert(cursor.clone()) {
                    let err = PageError::Decode(format!("cursor '{}' was already visited", cursor));
                    return Some((Err(err), (pager, Progress::Done, seen)));
                }
            }

            match pager.fetch(cursor.as_deref()).await {
                Ok(page) => {
                    let next = match &page.next_cursor {
                        Some(next) => Progress::At(Some(next.clone())),
                        None => Progress::Done,
                    };
                    Some((Ok(page), (pager, next, seen)))
                }
                Err(err) => Some((Err(err), (pager, Progress::Done, seen))),
            }
        })
    }

    /// Stream of items across all pages, in server order
    pub fn into_items(self) -> impl Stream<Item = Result<T, PageError>> + Send {
        self.into_pages().flat_map(|page| {
            let items = match page {
                Ok(page) => page.items.into_iter().map(Ok).collect(),
                Err(err) => vec![Err(err)],
            };
            stream::iter(items)
        })
    }
}
