// ABOUTME: Full sync - replace the destination with a complete copy of the source
// ABOUTME: Used for full_refresh tables and when an incremental destination is missing

use crate::config::RetryPolicy;
use crate::error::{SyncError, SyncResult};
use crate::handle::{DestinationHandle, SourceHandle};
use crate::sync::consistency::{self, Reconciliation};
use crate::sync::extract::ChunkedExtractor;
use crate::sync::{FullRefreshSpec, SyncOutcome};
use crate::table::{ColumnDef, ColumnType, Table};

/// Drop or truncate the destination, recreate it from the source schema and
/// copy every source row across in pages.
///
/// The configured key becomes a unique key on the destination only when the
/// source column is actually distinct; otherwise the table is created without
/// one and every row is copied as it is. Pages are ordered by the unique key
/// when there is one, and by every orderable column when there is not, so
/// OFFSET pagination never skips or repeats a row. The outcome carries the
/// row-count reconciliation; after a clean run destination and source counts
/// are equal.
pub async fn full_copy<S, D>(
    source: &Table<'_, S>,
    destination: &Table<'_, D>,
    spec: &FullRefreshSpec,
    retry: &RetryPolicy,
) -> SyncResult<SyncOutcome>
where
    S: SourceHandle + ?Sized,
    D: DestinationHandle + ?Sized,
{
    let columns = source.columns().await?;
    if columns.is_empty() {
        return Err(SyncError::Configuration(format!(
            "source table {} does not exist or has no columns",
            source
        )));
    }

    let unique_key = match &spec.primary_key {
        Some(key) => {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(SyncError::ColumnNotFound {
                    table: source.to_string(),
                    column: key.clone(),
                });
            }
            if source.is_distinct(key).await? {
                Some(key.clone())
            } else {
                tracing::warn!(
                    "Key column {} is not distinct in {}; creating {} without a unique key",
                    key,
                    source,
                    destination
                );
                None
            }
        }
        None => None,
    };

    let (order_column, tie_breakers) = match &unique_key {
        Some(key) => (key.clone(), Vec::new()),
        None => {
            let mut orderable = orderable_columns(&columns).into_iter();
            let first = orderable.next().ok_or_else(|| {
                SyncError::Configuration(format!(
                    "source table {} has no column that can order a full copy",
                    source
                ))
            })?;
            (first, orderable.collect())
        }
    };

    tracing::info!(
        "Starting full copy {} -> {} ({:?} existing destination)",
        source,
        destination,
        spec.load_options.if_exists
    );

    destination
        .handle()
        .replace_table(
            destination.table_ref(),
            &columns,
            unique_key.as_deref(),
            &spec.load_options,
        )
        .await?;

    let mut extractor = ChunkedExtractor::new(&order_column, tie_breakers, None, spec.chunk_size);
    let mut rows_copied = 0u64;

    loop {
        let page = extractor.next_page(source, retry).await?;
        if extractor.is_exhausted() {
            break;
        }

        // Append is not idempotent, so it is never retried
        rows_copied += destination
            .handle()
            .append(&page, destination.table_ref())
            .await?;

        tracing::debug!(
            "Full copy {} -> {}: {} rows so far",
            source,
            destination,
            rows_copied
        );
    }

    let reconciliation = consistency::verify_counts(source, destination).await;
    if let Reconciliation::Matched { rows } = &reconciliation {
        tracing::info!(
            "Full copy {} -> {} finished: {} rows",
            source,
            destination,
            rows
        );
    }

    Ok(SyncOutcome::FullCopy {
        rows_copied,
        reconciliation,
    })
}

/// Columns a total ORDER BY can use, in table order. JSON has no ordering
/// operator on PostgreSQL.
fn orderable_columns(columns: &[ColumnDef]) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.column_type != ColumnType::Json)
        .map(|c| c.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TableHandle;
    use crate::memory::MemoryDatabase;
    use crate::table::{IfExists, LoadOptions, TableRef};
    use crate::value::Value;

    fn spec(chunk_size: Option<u64>, if_exists: IfExists) -> FullRefreshSpec {
        FullRefreshSpec {
            source: TableRef::new(None, "src"),
            destination: TableRef::new(None, "dst"),
            primary_key: Some("id".to_string()),
            chunk_size,
            load_options: LoadOptions {
                if_exists,
                ..Default::default()
            },
        }
    }

    fn seed(db: &MemoryDatabase, table: &TableRef, n: i64) {
        db.create_table(
            table,
            vec![
                ColumnDef::new("id", ColumnType::BigInt),
                ColumnDef::new("name", ColumnType::Text),
            ],
            (1..=n)
                .map(|i| vec![Value::Int(i), Value::Text(format!("row {}", i))])
                .collect(),
        );
    }

    #[tokio::test]
    async fn test_full_copy_creates_destination() {
        let source_db = MemoryDatabase::new();
        let dest_db = MemoryDatabase::new();
        let spec = spec(Some(2), IfExists::Drop);
        seed(&source_db, &spec.source, 5);

        let outcome = full_copy(
            &Table::new(&source_db, &spec.source),
            &Table::new(&dest_db, &spec.destination),
            &spec,
            &RetryPolicy::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::FullCopy {
                rows_copied: 5,
                reconciliation: Reconciliation::Matched { rows: 5 },
            }
        );
        assert_eq!(dest_db.row_count(&spec.destination).await.unwrap(), 5);
        // 3 pages with data plus the empty page that ends the scan
        assert_eq!(source_db.calls().fetch_page, 4);
    }

    #[tokio::test]
    async fn test_full_copy_truncate_replaces_rows() {
        let source_db = MemoryDatabase::new();
        let dest_db = MemoryDatabase::new();
        let spec = spec(None, IfExists::Truncate);
        seed(&source_db, &spec.source, 3);
        seed(&dest_db, &spec.destination, 10);

        let outcome = full_copy(
            &Table::new(&source_db, &spec.source),
            &Table::new(&dest_db, &spec.destination),
            &spec,
            &RetryPolicy::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rows_copied(), 3);
        assert_eq!(dest_db.row_count(&spec.destination).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_full_copy_missing_source() {
        let source_db = MemoryDatabase::new();
        let dest_db = MemoryDatabase::new();
        let spec = spec(None, IfExists::Drop);

        let err = full_copy(
            &Table::new(&source_db, &spec.source),
            &Table::new(&dest_db, &spec.destination),
            &spec,
            &RetryPolicy::disabled(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "configuration");
        assert!(!dest_db.table_exists(&spec.destination).await.unwrap());
    }

    #[tokio::test]
    async fn test_full_copy_with_non_distinct_key_copies_every_row() {
        let source_db = MemoryDatabase::new();
        let dest_db = MemoryDatabase::new();
        let spec = spec(Some(2), IfExists::Drop);
        seed(&source_db, &spec.source, 3);
        source_db
            .insert_rows(&spec.source, vec![vec![Value::Int(2), Value::Text("again".to_string())]])
            .unwrap();

        let outcome = full_copy(
            &Table::new(&source_db, &spec.source),
            &Table::new(&dest_db, &spec.destination),
            &spec,
            &RetryPolicy::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::FullCopy {
                rows_copied: 4,
                reconciliation: Reconciliation::Matched { rows: 4 },
            }
        );
        // No unique key to order by, so pages are ordered by every column
        let requests = source_db.page_requests();
        assert_eq!(requests[0].watermark_column, "id");
        assert_eq!(requests[0].tie_breakers, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn test_full_copy_without_key_orders_by_orderable_columns() {
        let source_db = MemoryDatabase::new();
        let dest_db = MemoryDatabase::new();
        let mut spec = spec(Some(10), IfExists::Drop);
        spec.primary_key = None;
        source_db.create_table(
            &spec.source,
            vec![
                ColumnDef::new("payload", ColumnType::Json),
                ColumnDef::new("region", ColumnType::Text),
                ColumnDef::new("amount", ColumnType::BigInt),
            ],
            vec![
                vec![Value::Null, Value::Text("eu".to_string()), Value::Int(2)],
                vec![Value::Null, Value::Text("eu".to_string()), Value::Int(1)],
                vec![Value::Null, Value::Text("eu".to_string()), Value::Int(1)],
            ],
        );

        let outcome = full_copy(
            &Table::new(&source_db, &spec.source),
            &Table::new(&dest_db, &spec.destination),
            &spec,
            &RetryPolicy::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.rows_copied(), 3);
        let requests = source_db.page_requests();
        assert_eq!(requests[0].watermark_column, "region");
        assert_eq!(requests[0].tie_breakers, vec!["amount".to_string()]);
    }
}
