// ABOUTME: IncrementalSyncEngine - copies only the rows a destination table is missing
// ABOUTME: Compares watermarks, pages new rows across and upserts them by primary key

use std::cmp::Ordering;

use crate::config::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::handle::{DestinationHandle, SourceHandle};
use crate::sync::extract::ChunkedExtractor;
use crate::sync::{consistency, cursor, full};
use crate::sync::{FullRefreshSpec, SyncOutcome, SyncSpec, TableSpec};
use crate::table::Table;
use crate::utils::retry_with_backoff;
use crate::value::{display_cursor, RowSet, Value};

/// Runs table syncs between one source and one destination database.
///
/// Both handles are injected at construction and every table reference in a
/// [`SyncSpec`] is bound to exactly one of them: `spec.source` to the source
/// handle, `spec.destination` to the destination handle.
///
/// A run proceeds as follows:
/// 1. Missing destination: delegate to the full copy and stop
/// 2. Empty source: no-op
/// 3. Optional primary key distinctness check on the source
/// 4. Compare source and destination watermarks; a destination ahead of the
///    source is a hard error, equal watermarks are a no-op
/// 5. Page through source rows at or above the destination watermark and
///    upsert each page, strictly in order
/// 6. Advisory row-count reconciliation
pub struct IncrementalSyncEngine<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a D,
    retry: RetryPolicy,
}

/// Where the destination watermark stands relative to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorPosition {
    Behind,
    InSync,
}

impl<'a, S, D> IncrementalSyncEngine<'a, S, D>
where
    S: SourceHandle + ?Sized,
    D: DestinationHandle + ?Sized,
{
    pub fn new(source: &'a S, destination: &'a D) -> Self {
        Self {
            source,
            destination,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy applied to page fetches and upserts.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one configured table in its configured mode.
    pub async fn run(&self, spec: &TableSpec) -> SyncResult<SyncOutcome> {
        match spec {
            TableSpec::Incremental(spec) => self.sync_incremental(spec).await,
            TableSpec::FullRefresh(spec) => self.sync_full(spec).await,
        }
    }

    /// Replace the destination with a full copy of the source.
    pub async fn sync_full(&self, spec: &FullRefreshSpec) -> SyncResult<SyncOutcome> {
        let source = Table::new(self.source, &spec.source);
        let destination = Table::new(self.destination, &spec.destination);
        full::full_copy(&source, &destination, spec, &self.retry).await
    }

    /// Copy the rows the destination is missing, keyed by `spec.primary_key`.
    pub async fn sync_incremental(&self, spec: &SyncSpec) -> SyncResult<SyncOutcome> {
        let source = Table::new(self.source, &spec.source);
        let destination = Table::new(self.destination, &spec.destination);

        if !source.exists().await? {
            return Err(SyncError::Configuration(format!(
                "source table {} does not exist",
                source
            )));
        }

        // No baseline to be incremental against
        if !destination.exists().await? {
            tracing::info!(
                "Destination table {} does not exist, running a full sync",
                destination
            );
            return self.sync_full(&spec.to_full_refresh()).await;
        }

        let source_rows = source.row_count().await?;
        if source_rows == 0 {
            tracing::info!("Source table {} contains 0 rows", source);
            return Ok(SyncOutcome::NoOpEmptySource);
        }

        if spec.distinct_check {
            consistency::ensure_distinct(&source, &spec.primary_key).await?;
        }

        let source_cursor = cursor::max_watermark(&source, &spec.watermark_column).await?;
        let destination_cursor =
            cursor::max_watermark(&destination, &spec.watermark_column).await?;

        if compare_cursors(spec, source_cursor.as_ref(), destination_cursor.as_ref())?
            == CursorPosition::InSync
        {
            tracing::info!("Tables {} and {} are in sync", source, destination);
            return Ok(SyncOutcome::NoOpAlreadyInSync);
        }

        // Pre-loop estimate only; an empty page always ends the loop
        let expected = match &destination_cursor {
            Some(cursor) => source.count_since(&spec.watermark_column, cursor).await?,
            None => source_rows,
        };
        tracing::info!(
            "Found {} updated rows in source table {} since {}",
            expected,
            source,
            display_cursor(destination_cursor.as_ref())
        );

        let rows_copied = self
            .copy_new_rows(spec, destination_cursor, expected)
            .await?;

        let reconciliation = consistency::verify_counts(&source, &destination).await;
        tracing::info!(
            "{} synced to {}: {} rows copied",
            source,
            destination,
            rows_copied
        );

        Ok(SyncOutcome::Completed {
            rows_copied,
            reconciliation,
        })
    }

    async fn copy_new_rows(
        &self,
        spec: &SyncSpec,
        lower_bound: Option<Value>,
        expected: u64,
    ) -> SyncResult<u64> {
        let source = Table::new(self.source, &spec.source);
        let mut extractor = ChunkedExtractor::new(
            &spec.watermark_column,
            vec![spec.primary_key.clone()],
            lower_bound,
            spec.chunk_size,
        );
        let mut copied = 0u64;

        while copied < expected {
            let page = extractor.next_page(&source, &self.retry).await?;

            if page.is_empty() {
                tracing::warn!(
                    "Source {} ran out of rows after {} of {} expected; rows may have been removed during the sync",
                    spec.source,
                    copied,
                    expected
                );
                break;
            }

            self.upsert_page(spec, &page).await?;
            copied += page.len() as u64;

            if extractor.pages() % 10 == 0 {
                tracing::info!(
                    "Progress: {} -> {} - {}/{} rows ({} pages)",
                    spec.source,
                    spec.destination,
                    copied,
                    expected,
                    extractor.pages()
                );
            }
        }

        Ok(copied)
    }

    async fn upsert_page(&self, spec: &SyncSpec, page: &RowSet) -> SyncResult<u64> {
        let handle = self.destination;
        let table = &spec.destination;
        let key = spec.primary_key.as_str();
        let options = &spec.load_options;
        let written = retry_with_backoff(
            move || handle.upsert(page, table, key, options),
            self.retry.max_retries,
            self.retry.initial_delay(),
        )
        .await?;
        Ok(written)
    }
}

fn compare_cursors(
    spec: &SyncSpec,
    source_cursor: Option<&Value>,
    destination_cursor: Option<&Value>,
) -> SyncResult<CursorPosition> {
    let source_cursor = match source_cursor {
        Some(cursor) => cursor,
        None => {
            return Err(SyncError::Configuration(format!(
                "watermark column {} has no non-NULL values in source table {}",
                spec.watermark_column, spec.source
            )))
        }
    };
    let destination_cursor = match destination_cursor {
        Some(cursor) => cursor,
        // Empty destination: initial bulk load through the incremental path
        None => return Ok(CursorPosition::Behind),
    };

    match destination_cursor.compare(source_cursor) {
        Some(Ordering::Less) => Ok(CursorPosition::Behind),
        Some(Ordering::Equal) => Ok(CursorPosition::InSync),
        Some(Ordering::Greater) => Err(SyncError::DestinationAhead {
            source_table: spec.source.to_string(),
            destination: spec.destination.to_string(),
            column: spec.watermark_column.clone(),
            source_cursor: source_cursor.to_string(),
            destination_cursor: destination_cursor.to_string(),
        }),
        None => Err(SyncError::IncomparableWatermarks {
            column: spec.watermark_column.clone(),
            source_cursor: source_cursor.to_string(),
            destination_cursor: destination_cursor.to_string(),
        }),
    }
}
