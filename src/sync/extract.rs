// ABOUTME: Chunked extractor - OFFSET/LIMIT pages of rows at or above a watermark
// ABOUTME: The offset advances by rows actually returned, never by the page size

use anyhow::Result;

use crate::config::RetryPolicy;
use crate::handle::{PageRequest, SourceHandle};
use crate::table::Table;
use crate::utils::retry_with_backoff;
use crate::value::{RowSet, Value};

/// Page size used when a sync specification sets no chunk size.
pub const MAX_PAGE_ROWS: u64 = 100_000;

/// Build the request for one page.
///
/// The lower bound is inclusive: rows sharing the boundary watermark value
/// may not all have been copied yet, and re-copying the ones that were is
/// harmless under upsert. Tie breakers equal to the watermark column (or
/// repeated) are dropped.
pub fn page_request(
    watermark_column: &str,
    tie_breakers: &[String],
    lower_bound: Option<&Value>,
    offset: u64,
    chunk_size: Option<u64>,
) -> PageRequest {
    let mut ties: Vec<String> = Vec::with_capacity(tie_breakers.len());
    for column in tie_breakers {
        if column != watermark_column && !ties.contains(column) {
            ties.push(column.clone());
        }
    }
    PageRequest {
        watermark_column: watermark_column.to_string(),
        tie_breakers: ties,
        lower_bound: lower_bound.cloned(),
        offset,
        limit: chunk_size.unwrap_or(MAX_PAGE_ROWS).max(1),
    }
}

/// Fetch one page, retrying transient failures per `retry`.
///
/// Fetching a page has no side effects, so a failed attempt can be repeated.
pub async fn next_page<S>(
    table: &Table<'_, S>,
    request: &PageRequest,
    retry: &RetryPolicy,
) -> Result<RowSet>
where
    S: SourceHandle + ?Sized,
{
    let handle = table.handle();
    let table_ref = table.table_ref();
    retry_with_backoff(
        move || handle.fetch_page(table_ref, request),
        retry.max_retries,
        retry.initial_delay(),
    )
    .await
}

/// Pagination state for one copy loop.
///
/// Pages must be requested strictly in order: each request's offset depends
/// on how many rows the previous page actually returned.
#[derive(Debug, Clone)]
pub struct ChunkedExtractor {
    watermark_column: String,
    tie_breakers: Vec<String>,
    lower_bound: Option<Value>,
    chunk_size: Option<u64>,
    offset: u64,
    pages: u64,
    exhausted: bool,
}

impl ChunkedExtractor {
    pub fn new(
        watermark_column: &str,
        tie_breakers: Vec<String>,
        lower_bound: Option<Value>,
        chunk_size: Option<u64>,
    ) -> Self {
        Self {
            watermark_column: watermark_column.to_string(),
            tie_breakers,
            lower_bound,
            chunk_size,
            offset: 0,
            pages: 0,
            exhausted: false,
        }
    }

    /// Request for the next page at the current offset.
    pub fn request(&self) -> PageRequest {
        page_request(
            &self.watermark_column,
            &self.tie_breakers,
            self.lower_bound.as_ref(),
            self.offset,
            self.chunk_size,
        )
    }

    /// Record a page that was fetched with [`Self::request`].
    ///
    /// An empty page ends the scan.
    pub fn advance(&mut self, page: &RowSet) {
        if page.is_empty() {
            self.exhausted = true;
            return;
        }
        self.pages += 1;
        self.offset += page.len() as u64;
    }

    /// Fetch and record the next page. Returns an empty page once exhausted.
    pub async fn next_page<S>(&mut self, table: &Table<'_, S>, retry: &RetryPolicy) -> Result<RowSet>
    where
        S: SourceHandle + ?Sized,
    {
        if self.exhausted {
            return Ok(RowSet::default());
        }
        tracing::debug!("OFFSET: {}", self.offset);
        let page = next_page(table, &self.request(), retry).await?;
        self.advance(&page);
        Ok(page)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
