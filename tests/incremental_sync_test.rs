// ABOUTME: Integration tests for the incremental sync engine against in-memory tables
// ABOUTME: Covers completeness, idempotence, paging, watermark edge cases and retries

use chrono::{TimeZone, Utc};
use table_syncer::config::RetryPolicy;
use table_syncer::memory::MemoryDatabase;
use table_syncer::sync::consistency::Reconciliation;
use table_syncer::sync::{IncrementalSyncEngine, SyncOutcome, SyncSpec};
use table_syncer::table::{ColumnDef, ColumnType, LoadOptions, TableRef};
use table_syncer::value::Value;
use table_syncer::SyncError;

fn events() -> TableRef {
    TableRef::new(None, "events")
}

fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", ColumnType::BigInt),
        ColumnDef::new("seq", ColumnType::BigInt),
        ColumnDef::new("payload", ColumnType::Text),
    ]
}

fn row(id: i64, seq: i64) -> Vec<Value> {
    vec![
        Value::Int(id),
        Value::Int(seq),
        Value::Text(format!("event-{}-{}", id, seq)),
    ]
}

/// Rows with ids 1..=n where seq equals id.
fn rows(n: i64) -> Vec<Vec<Value>> {
    (1..=n).map(|i| row(i, i)).collect()
}

fn spec(chunk_size: Option<u64>) -> SyncSpec {
    SyncSpec {
        source: events(),
        destination: events(),
        primary_key: "id".to_string(),
        watermark_column: "seq".to_string(),
        chunk_size,
        distinct_check: true,
        load_options: LoadOptions::default(),
    }
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 1,
    }
}

fn setup(source_rows: Vec<Vec<Value>>, destination_rows: Vec<Vec<Value>>) -> (MemoryDatabase, MemoryDatabase) {
    let source = MemoryDatabase::new();
    let destination = MemoryDatabase::new();
    source.create_table(&events(), columns(), source_rows);
    destination.create_table(&events(), columns(), destination_rows);
    (source, destination)
}

#[tokio::test]
async fn test_sync_copies_missing_rows_and_is_idempotent() {
    let (source, destination) = setup(rows(10), rows(4));
    let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(fast_retry(0));

    let outcome = engine.sync_incremental(&spec(Some(3))).await.unwrap();
    // Rows at the boundary watermark (seq = 4) are fetched again
    assert_eq!(outcome.rows_copied(), 7);
    assert!(matches!(
        outcome,
        SyncOutcome::Completed {
            reconciliation: Reconciliation::Matched { rows: 10 },
            ..
        }
    ));
    assert_eq!(
        destination.rows_sorted_by(&events(), "id").unwrap(),
        source.rows_sorted_by(&events(), "id").unwrap()
    );

    let upserts = destination.calls().upsert;
    let second = engine.sync_incremental(&spec(Some(3))).await.unwrap();
    assert_eq!(second, SyncOutcome::NoOpAlreadyInSync);
    assert_eq!(destination.calls().upsert, upserts);
    assert_eq!(
        destination.rows_sorted_by(&events(), "id").unwrap(),
        source.rows_sorted_by(&events(), "id").unwrap()
    );
}

#[tokio::test]
async fn test_chunk_sizes_page_through_every_row() {
    for (chunk, expected_pages) in [(1u64, 10usize), (5, 2), (10, 1), (11, 1)] {
        let (source, destination) = setup(rows(10), Vec::new());
        let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(fast_retry(0));

        let outcome = engine.sync_incremental(&spec(Some(chunk))).await.unwrap();
        assert_eq!(outcome.rows_copied(), 10, "chunk size {}", chunk);

        let requests = source.page_requests();
        assert_eq!(requests.len(), expected_pages, "chunk size {}", chunk);
        for (i, request) in requests.iter().enumerate() {
            assert_eq!(request.offset, i as u64 * chunk);
            assert_eq!(request.limit, chunk);
            assert_eq!(request.tie_breakers, vec!["id".to_string()]);
            // Empty destination: scan from the start
            assert!(request.lower_bound.is_none());
        }
        assert_eq!(
            destination.rows_sorted_by(&events(), "id").unwrap(),
            rows(10),
            "chunk size {}",
            chunk
        );
    }
}

#[tokio::test]
async fn test_rows_sharing_boundary_watermark_are_not_skipped() {
    // ids 3, 4 and 5 share seq = 3; the destination has only seen id 3
    let source_rows = vec![row(1, 1), row(2, 2), row(3, 3), row(4, 3), row(5, 3), row(6, 4)];
    let (source, destination) = setup(source_rows, vec![row(1, 1), row(2, 2), row(3, 3)]);
    let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(fast_retry(0));

    let outcome = engine.sync_incremental(&spec(Some(2))).await.unwrap();
    assert_eq!(outcome.rows_copied(), 4);

    let requests = source.page_requests();
    assert_eq!(requests[0].lower_bound, Some(Value::Int(3)));
    assert_eq!(
        destination.rows_sorted_by(&events(), "id").unwrap(),
        source.rows_sorted_by(&events(), "id").unwrap()
    );
}

#[tokio::test]
async fn test_destination_ahead_fails_without_writing() {
    let (source, destination) = setup(rows(10), vec![row(1, 20)]);
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let err = engine.sync_incremental(&spec(None)).await.unwrap_err();
    match &err {
        SyncError::DestinationAhead {
            source_cursor,
            destination_cursor,
            ..
        } => {
            assert_eq!(source_cursor, "10");
            assert_eq!(destination_cursor, "20");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(source.calls().fetch_page, 0);
    assert_eq!(destination.calls().upsert, 0);
    assert_eq!(destination.rows_sorted_by(&events(), "id").unwrap(), vec![row(1, 20)]);
}

#[tokio::test]
async fn test_empty_source_is_a_noop() {
    let (source, destination) = setup(Vec::new(), rows(3));
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let outcome = engine.sync_incremental(&spec(None)).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NoOpEmptySource);
    assert_eq!(source.calls().fetch_page, 0);
    assert_eq!(destination.rows_sorted_by(&events(), "id").unwrap(), rows(3));
}

#[tokio::test]
async fn test_duplicate_source_key_is_rejected_before_copying() {
    let source_rows = vec![row(1, 1), row(2, 2), row(2, 3)];
    let (source, destination) = setup(source_rows, Vec::new());
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let err = engine.sync_incremental(&spec(None)).await.unwrap_err();
    assert_eq!(err.kind(), "duplicate_key");
    assert_eq!(source.calls().fetch_page, 0);
    assert!(destination.rows_sorted_by(&events(), "id").unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_key_check_can_be_disabled() {
    let source_rows = vec![row(1, 1), row(2, 2), row(2, 3)];
    let (source, destination) = setup(source_rows, Vec::new());
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let mut spec = spec(None);
    spec.distinct_check = false;
    let outcome = engine.sync_incremental(&spec).await.unwrap();

    // The later row wins the key; the row counts then disagree
    assert_eq!(outcome.rows_copied(), 3);
    match outcome {
        SyncOutcome::Completed { reconciliation, .. } => assert_eq!(
            reconciliation,
            Reconciliation::Mismatch {
                source_rows: 3,
                destination_rows: 2
            }
        ),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_destination_falls_back_to_full_copy() {
    let source = MemoryDatabase::new();
    let destination = MemoryDatabase::new();
    source.create_table(&events(), columns(), rows(7));
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let outcome = engine.sync_incremental(&spec(Some(3))).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::FullCopy { rows_copied: 7, .. }));
    assert_eq!(destination.calls().replace_table, 1);
    assert_eq!(destination.calls().upsert, 0);
    assert_eq!(destination.rows_sorted_by(&events(), "id").unwrap(), rows(7));

    // The next run is incremental and finds nothing to do
    let second = engine.sync_incremental(&spec(Some(3))).await.unwrap();
    assert_eq!(second, SyncOutcome::NoOpAlreadyInSync);
}

#[tokio::test]
async fn test_missing_destination_with_duplicate_keys_copies_without_unique_key() {
    let source = MemoryDatabase::new();
    let destination = MemoryDatabase::new();
    source.create_table(&events(), columns(), vec![row(1, 1), row(1, 2), row(2, 3)]);
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let mut spec = spec(Some(2));
    spec.distinct_check = false;
    let outcome = engine.sync_incremental(&spec).await.unwrap();

    assert!(matches!(
        outcome,
        SyncOutcome::FullCopy {
            rows_copied: 3,
            reconciliation: Reconciliation::Matched { rows: 3 },
        }
    ));
    // Ordered by every column, since the key cannot order the copy on its own
    let requests = source.page_requests();
    assert_eq!(requests[0].watermark_column, "id");
    assert_eq!(
        requests[0].tie_breakers,
        vec!["seq".to_string(), "payload".to_string()]
    );
}

#[tokio::test]
async fn test_missing_source_is_a_configuration_error() {
    let source = MemoryDatabase::new();
    let destination = MemoryDatabase::new();
    destination.create_table(&events(), columns(), rows(2));
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let err = engine.sync_incremental(&spec(None)).await.unwrap_err();
    assert_eq!(err.kind(), "configuration");
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (source, destination) = setup(rows(6), rows(1));
    source.fail_next_fetches(2);
    destination.fail_next_upserts(1);
    let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(fast_retry(3));

    let outcome = engine.sync_incremental(&spec(Some(3))).await.unwrap();
    assert_eq!(outcome.rows_copied(), 6);
    // Two pages plus two failed attempts
    assert_eq!(source.calls().fetch_page, 4);
    assert_eq!(destination.calls().upsert, 3);
    assert_eq!(destination.rows_sorted_by(&events(), "id").unwrap(), rows(6));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let (source, destination) = setup(rows(6), rows(1));
    source.fail_next_fetches(5);
    let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(fast_retry(2));

    let err = engine.sync_incremental(&spec(Some(3))).await.unwrap_err();
    assert_eq!(err.kind(), "transient_io");
    assert!(err.to_string().contains("injected fetch failure"));
    assert_eq!(source.calls().fetch_page, 3);
    assert_eq!(destination.rows_sorted_by(&events(), "id").unwrap(), rows(1));
}

#[tokio::test]
async fn test_text_destination_watermark_compares_with_timestamps() {
    let columns = vec![
        ColumnDef::new("id", ColumnType::BigInt),
        ColumnDef::new("updated_at", ColumnType::TimestampTz),
    ];
    let at = |hour: u32| Value::TimestampTz(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap());

    let source = MemoryDatabase::new();
    let destination = MemoryDatabase::new();
    source.create_table(
        &events(),
        columns.clone(),
        vec![
            vec![Value::Int(1), at(1)],
            vec![Value::Int(2), at(2)],
            vec![Value::Int(3), at(3)],
        ],
    );
    // Timestamps stored as text, the way a SQLite destination holds them
    destination.create_table(
        &events(),
        columns,
        vec![vec![Value::Int(1), Value::Text("2024-01-01 01:00:00".to_string())]],
    );

    let mut spec = spec(None);
    spec.watermark_column = "updated_at".to_string();
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let outcome = engine.sync_incremental(&spec).await.unwrap();
    assert_eq!(outcome.rows_copied(), 3);
    assert_eq!(destination.rows_sorted_by(&events(), "id").unwrap().len(), 3);
}
