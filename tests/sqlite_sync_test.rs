// ABOUTME: End-to-end sync tests between two SQLite database files
// ABOUTME: Drives the engine and the runner through real SQL on temporary databases

use rusqlite::Connection;
use std::path::Path;
use table_syncer::config::{RetryPolicy, RunConfig};
use table_syncer::runner::{SpecStatus, SyncRunner};
use table_syncer::sqlite::SqliteDatabase;
use table_syncer::sync::{IncrementalSyncEngine, SyncOutcome, SyncSpec};
use table_syncer::table::{LoadOptions, TableRef};
use tempfile::TempDir;

fn create_orders(path: &Path, rows: &[(i64, &str, f64)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (
            id INTEGER NOT NULL UNIQUE,
            updated_at TEXT NOT NULL,
            amount REAL
        )",
    )
    .unwrap();
    insert_orders(path, rows);
}

fn insert_orders(path: &Path, rows: &[(i64, &str, f64)]) {
    let conn = Connection::open(path).unwrap();
    for (id, updated_at, amount) in rows {
        conn.execute(
            "INSERT INTO orders (id, updated_at, amount) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET updated_at = excluded.updated_at, amount = excluded.amount",
            rusqlite::params![id, updated_at, amount],
        )
        .unwrap();
    }
}

fn read_orders(path: &Path) -> Vec<(i64, String, f64)> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT id, updated_at, amount FROM orders ORDER BY id")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

fn orders_spec() -> SyncSpec {
    SyncSpec {
        source: TableRef::new(None, "orders"),
        destination: TableRef::new(None, "orders"),
        primary_key: "id".to_string(),
        watermark_column: "updated_at".to_string(),
        chunk_size: Some(2),
        distinct_check: true,
        load_options: LoadOptions::default(),
    }
}

#[tokio::test]
async fn test_incremental_sync_between_sqlite_files() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    let destination_path = dir.path().join("destination.db");

    create_orders(
        &source_path,
        &[
            (1, "2024-01-01 10:00:00", 10.0),
            (2, "2024-01-02 10:00:00", 20.0),
            (3, "2024-01-03 10:00:00", 30.0),
        ],
    );
    create_orders(&destination_path, &[(1, "2024-01-01 10:00:00", 10.0)]);

    let source = SqliteDatabase::open(source_path.to_str().unwrap()).unwrap();
    let destination = SqliteDatabase::open(destination_path.to_str().unwrap()).unwrap();
    let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(RetryPolicy::disabled());

    let outcome = engine.sync_incremental(&orders_spec()).await.unwrap();
    assert_eq!(outcome.rows_copied(), 3);
    assert_eq!(read_orders(&destination_path), read_orders(&source_path));

    // An update moves the watermark forward and overwrites the destination row
    insert_orders(
        &source_path,
        &[(2, "2024-01-04 09:00:00", 25.0), (4, "2024-01-04 09:30:00", 40.0)],
    );
    // Rows from the previous watermark on: ids 3, 2 and 4
    let outcome = engine.sync_incremental(&orders_spec()).await.unwrap();
    assert_eq!(outcome.rows_copied(), 3);
    assert_eq!(read_orders(&destination_path), read_orders(&source_path));

    let outcome = engine.sync_incremental(&orders_spec()).await.unwrap();
    assert_eq!(outcome, SyncOutcome::NoOpAlreadyInSync);
}

#[tokio::test]
async fn test_missing_sqlite_destination_is_created_by_full_copy() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    let destination_path = dir.path().join("destination.db");
    create_orders(
        &source_path,
        &[(1, "2024-01-01 10:00:00", 1.5), (2, "2024-01-02 10:00:00", 2.5)],
    );

    let source = SqliteDatabase::open(source_path.to_str().unwrap()).unwrap();
    let destination = SqliteDatabase::open(destination_path.to_str().unwrap()).unwrap();
    let engine = IncrementalSyncEngine::new(&source, &destination);

    let outcome = engine.sync_incremental(&orders_spec()).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::FullCopy { rows_copied: 2, .. }));
    assert_eq!(read_orders(&destination_path), read_orders(&source_path));

    // The created table carries a unique key, so later upserts apply in place
    insert_orders(&source_path, &[(1, "2024-01-05 10:00:00", 9.0)]);
    let outcome = engine.sync_incremental(&orders_spec()).await.unwrap();
    assert_eq!(outcome.rows_copied(), 2);
    assert_eq!(read_orders(&destination_path), read_orders(&source_path));
}

#[tokio::test]
async fn test_runner_isolates_invalid_and_failing_specs() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    let destination_path = dir.path().join("destination.db");
    create_orders(&source_path, &[(1, "2024-01-01 10:00:00", 1.0)]);
    create_orders(&destination_path, &[(1, "2024-02-01 10:00:00", 1.0)]);

    let config = RunConfig::from_toml(&format!(
        r#"
[source]
kind = "sqlite"
url = "{}"

[destination]
kind = "sqlite"
url = "{}"

[retry]
max_retries = 0

[[tables]]
type = "incremental"
source = "orders"
destination = "orders"
primary_key = "id"
watermark_column = "updated_at"

[[tables]]
type = "sideways"
source = "orders"
destination = "orders"

[[tables]]
type = "full_refresh"
source = "orders"
destination = "orders_copy"
primary_key = "id"
"#,
        source_path.display(),
        destination_path.display()
    ))
    .unwrap();

    let source = SqliteDatabase::open(&config.source.url).unwrap();
    let destination = SqliteDatabase::open(&config.destination.url).unwrap();
    let runner = SyncRunner::new(&source, &destination, config.retry.clone());
    let summary = runner.run(&config.select(&[])).await;

    assert_eq!(summary.reports.len(), 3);
    assert!(!summary.is_success());
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.completed, 1);

    // The destination is ahead of the source for the incremental spec
    match &summary.reports[0].status {
        SpecStatus::Failed { kind, .. } => assert_eq!(kind, "destination_ahead"),
        other => panic!("unexpected status: {other:?}"),
    }
    match &summary.reports[1].status {
        SpecStatus::Failed { kind, .. } => assert_eq!(kind, "configuration"),
        other => panic!("unexpected status: {other:?}"),
    }
    match &summary.reports[2].status {
        SpecStatus::Completed { rows_copied, .. } => assert_eq!(*rows_copied, 1),
        other => panic!("unexpected status: {other:?}"),
    }

    let conn = Connection::open(&destination_path).unwrap();
    let copied: i64 = conn
        .query_row("SELECT COUNT(*) FROM orders_copy", [], |row| row.get(0))
        .unwrap();
    assert_eq!(copied, 1);
}

fn count_rows(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn test_full_refresh_with_shared_distkey_copies_every_row() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    let destination_path = dir.path().join("destination.db");

    let conn = Connection::open(&source_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id INTEGER NOT NULL, customer_id INTEGER NOT NULL, amount REAL);
         INSERT INTO orders VALUES (1, 7, 1.0), (2, 7, 2.0), (3, 8, 3.0);",
    )
    .unwrap();

    let config = RunConfig::from_toml(&format!(
        r#"
[source]
kind = "sqlite"
url = "{}"

[destination]
kind = "sqlite"
url = "{}"

[[tables]]
type = "full_refresh"
source = "orders"
destination = "orders"
distkey = "customer_id"
chunk_size = 2
"#,
        source_path.display(),
        destination_path.display()
    ))
    .unwrap();

    let source = SqliteDatabase::open(&config.source.url).unwrap();
    let destination = SqliteDatabase::open(&config.destination.url).unwrap();
    let runner = SyncRunner::new(&source, &destination, RetryPolicy::disabled());
    let summary = runner.run(&config.select(&[])).await;

    assert!(summary.is_success(), "{:?}", summary.reports);
    match &summary.reports[0].status {
        SpecStatus::Completed { rows_copied, .. } => assert_eq!(*rows_copied, 3),
        other => panic!("unexpected status: {other:?}"),
    }
    assert_eq!(count_rows(&destination_path, "orders"), 3);
}

#[tokio::test]
async fn test_missing_destination_with_duplicate_keys_and_check_disabled() {
    let dir = TempDir::new().unwrap();
    let source_path = dir.path().join("source.db");
    let destination_path = dir.path().join("destination.db");

    let conn = Connection::open(&source_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE orders (id INTEGER NOT NULL, updated_at TEXT NOT NULL, amount REAL);
         INSERT INTO orders VALUES
             (1, '2024-01-01 10:00:00', 1.0),
             (1, '2024-01-02 10:00:00', 2.0),
             (2, '2024-01-03 10:00:00', 3.0);",
    )
    .unwrap();

    let source = SqliteDatabase::open(source_path.to_str().unwrap()).unwrap();
    let destination = SqliteDatabase::open(destination_path.to_str().unwrap()).unwrap();
    let engine = IncrementalSyncEngine::new(&source, &destination).with_retry(RetryPolicy::disabled());

    let mut spec = orders_spec();
    spec.distinct_check = false;
    let outcome = engine.sync_incremental(&spec).await.unwrap();

    assert!(matches!(outcome, SyncOutcome::FullCopy { rows_copied: 3, .. }));
    assert_eq!(count_rows(&destination_path, "orders"), 3);
}
