//! Cursor implementation for iterating over query results.

use crate::error::{DataApiError, Result};
use crate::path::{DistinctValues, FieldPath};
use crate::query::FindQuery;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::BoxFuture;
use futures::Stream;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Documents in server order.
    pub documents: Vec<Document>,
    /// Opaque token for the next page; `None` on the last page.
    pub next_page_state: Option<String>,
}

/// Source of result pages for a cursor.
///
/// Implementations must pass `page_state` back to the server unmodified.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page of `query` that starts at `page_state` (the first page
    /// when `None`).
    async fn fetch_page(&self, query: &FindQuery, page_state: Option<&str>) -> Result<Page>;
}

/// Lifecycle of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Nothing fetched yet.
    Unstarted,
    /// At least one page fetched and more may follow.
    Active,
    /// Every document has been yielded or the limit was reached.
    Exhausted,
    /// Closed by the caller.
    Closed,
}

/// A cursor for iterating over query results.
///
/// Nothing is fetched until the first document is pulled. Cursors implement
/// `Stream` and can be used with async iteration.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut cursor = collection.find(doc! { "status": "active" }, None)?;
/// while let Some(doc) = cursor.next().await {
///     println!("{:?}", doc?);
/// }
/// ```
pub struct Cursor<T> {
    query: Arc<FindQuery>,
    fetcher: Arc<dyn PageFetcher>,
    state: CursorState,
    buffer: VecDeque<Document>,
    page_state: Option<String>,
    retrieved: u64,
    /// In-flight page request, kept across polls.
    pending: Option<BoxFuture<'static, Result<Page>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Cursor<T> {
    /// Create an unstarted cursor over `query`.
    pub fn new(query: Arc<FindQuery>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            query,
            fetcher,
            state: CursorState::Unstarted,
            buffer: VecDeque::new(),
            page_state: None,
            retrieved: 0,
            pending: None,
            _marker: PhantomData,
        }
    }

    /// The query this cursor runs.
    pub fn query(&self) -> &FindQuery {
        &self.query
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Number of documents yielded since creation or the last rewind.
    pub fn retrieved(&self) -> u64 {
        self.retrieved
    }

    /// Token of the next page to fetch, if any.
    pub fn page_state(&self) -> Option<&str> {
        self.page_state.as_deref()
    }

    /// Number of fetched documents not yet yielded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the cursor may still yield documents.
    pub fn alive(&self) -> bool {
        match self.state {
            CursorState::Unstarted => true,
            CursorState::Active => {
                !self.limit_reached() && (!self.buffer.is_empty() || self.page_state.is_some())
            }
            CursorState::Exhausted | CursorState::Closed => false,
        }
    }

    /// Close the cursor.
    ///
    /// Any page request of this cursor still in flight is dropped. Further
    /// pulls end the sequence immediately.
    pub fn close(&mut self) {
        self.state = CursorState::Closed;
        self.buffer.clear();
        self.page_state = None;
        self.pending = None;
    }

    /// Reset to the unstarted state, keeping the query.
    pub fn rewind(&mut self) -> &mut Self {
        self.state = CursorState::Unstarted;
        self.buffer.clear();
        self.page_state = None;
        self.retrieved = 0;
        self.pending = None;
        self
    }

    /// Pull the next raw document.
    pub async fn next_raw(&mut self) -> Result<Option<Document>> {
        futures::future::poll_fn(|cx| self.poll_next_document(cx)).await
    }

    /// Distinct values of `path` over the rest of this cursor.
    ///
    /// Drains the cursor from its current position, documents already
    /// buffered included; rewind first to cover the whole result set. Fails
    /// before fetching anything when the query asks for `$similarity` or the
    /// path is malformed.
    pub async fn distinct(&mut self, path: &str) -> Result<Vec<Bson>> {
        if self.query.include_similarity() {
            return Err(DataApiError::invalid_argument(
                "distinct cannot be used on a query that includes similarity",
            ));
        }
        let path = FieldPath::parse(path)?;
        let mut values = DistinctValues::new();
        while let Some(document) = self.next_raw().await? {
            values.extend_from(&path, &document);
        }
        debug!(path = %path, distinct = values.len(), "distinct values collected");
        Ok(values.into_vec())
    }

    fn limit_reached(&self) -> bool {
        self.query.limit().is_some_and(|limit| self.retrieved >= limit)
    }

    fn exhaust(&mut self) {
        self.state = CursorState::Exhausted;
        self.buffer.clear();
        self.page_state = None;
        self.pending = None;
    }

    fn start_fetch(&self) -> BoxFuture<'static, Result<Page>> {
        let fetcher = Arc::clone(&self.fetcher);
        let query = Arc::clone(&self.query);
        if query.is_paginated() {
            let page_state = self.page_state.clone();
            Box::pin(async move {
                debug!(page_state = ?page_state, "fetching page");
                fetcher.fetch_page(&query, page_state.as_deref()).await
            })
        } else {
            Box::pin(materialize(fetcher, query))
        }
    }

    fn absorb(&mut self, page: Page) {
        let skip = match self.state {
            CursorState::Unstarted if !self.query.is_paginated() => {
                self.query.skip().unwrap_or(0) as usize
            }
            _ => 0,
        };
        self.state = CursorState::Active;
        self.buffer.extend(page.documents.into_iter().skip(skip));
        self.page_state = page.next_page_state;
    }

    fn poll_next_document(&mut self, cx: &mut Context<'_>) -> Poll<Result<Option<Document>>> {
        loop {
            if matches!(self.state, CursorState::Exhausted | CursorState::Closed) {
                return Poll::Ready(Ok(None));
            }
            if self.limit_reached() {
                self.exhaust();
                return Poll::Ready(Ok(None));
            }
            if let Some(document) = self.buffer.pop_front() {
                self.retrieved += 1;
                return Poll::Ready(Ok(Some(document)));
            }
            if self.state == CursorState::Active && self.page_state.is_none() {
                self.exhaust();
                return Poll::Ready(Ok(None));
            }

            let mut fetch = match self.pending.take() {
                Some(fetch) => fetch,
                None => self.start_fetch(),
            };
            match fetch.as_mut().poll(cx) {
                Poll::Pending => {
                    self.pending = Some(fetch);
                    return Poll::Pending;
                }
                // state is untouched, so the same page is requested on retry
                Poll::Ready(Err(err)) => {
                    warn!(error = %err, "page fetch failed");
                    return Poll::Ready(Err(err));
                }
                Poll::Ready(Ok(page)) => self.absorb(page),
            }
        }
    }
}

impl<T: DeserializeOwned> Cursor<T> {
    /// Try to get the next document.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        match self.next_raw().await? {
            Some(document) => decode(document).map(Some),
            None => Ok(None),
        }
    }

    /// Get the next document, failing with [`DataApiError::CursorClosed`]
    /// once the cursor is closed or exhausted.
    pub async fn next_document(&mut self) -> Result<T> {
        self.try_next().await?.ok_or(DataApiError::CursorClosed)
    }

    /// Collect the remaining documents without consuming the cursor.
    pub async fn drain(&mut self) -> Result<Vec<T>> {
        let mut results = Vec::new();
        while let Some(doc) = self.try_next().await? {
            results.push(doc);
        }
        Ok(results)
    }

    /// Collect all remaining documents into a vector.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        self.drain().await
    }
}

/// Fetch every page of a ranked query before anything is yielded.
async fn materialize(fetcher: Arc<dyn PageFetcher>, query: Arc<FindQuery>) -> Result<Page> {
    let mut documents = Vec::new();
    let mut page_state: Option<String> = None;
    loop {
        debug!(page_state = ?page_state, "fetching page of non-paginated query");
        let page = fetcher.fetch_page(&query, page_state.as_deref()).await?;
        documents.extend(page.documents);
        match page.next_page_state {
            Some(next) => page_state = Some(next),
            None => break,
        }
    }
    Ok(Page {
        documents,
        next_page_state: None,
    })
}

pub(crate) fn decode<T: DeserializeOwned>(document: Document) -> Result<T> {
    bson::from_document(document).map_err(|e| DataApiError::Deserialization(e.to_string()))
}

/// A fresh, unstarted cursor over the same query. Buffer and page token are
/// not shared.
impl<T> Clone for Cursor<T> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.query), Arc::clone(&self.fetcher))
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.query)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("page_state", &self.page_state)
            .field("retrieved", &self.retrieved)
            .finish()
    }
}

impl<T: DeserializeOwned> Stream for Cursor<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.poll_next_document(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Some(document))) => Poll::Ready(Some(decode(document))),
            Poll::Ready(Ok(None)) => Poll::Ready(None),
            Poll::Ready(Err(err)) => Poll::Ready(Some(Err(err))),
        }
    }
}
