// ABOUTME: Read-only comparison of source and destination tables
// ABOUTME: Snapshots watermark and row count on both sides, optionally appended as JSON lines

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::handle::TableHandle;
use crate::sync::TableSpec;
use crate::table::Table;
use crate::value::{display_cursor, Value};

/// Watermark and row count of one side, taken only when the table exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SideSnapshot {
    pub watermark: Option<Value>,
    pub rows: u64,
}

/// One comparison row. All snapshots of a run share the same `snap_time`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub snap_time: DateTime<Utc>,
    pub table: String,
    pub watermark_column: Option<String>,
    pub source: Option<SideSnapshot>,
    pub destination: Option<SideSnapshot>,
}

impl Comparison {
    /// Both sides exist with equal row counts and equal watermarks.
    pub fn in_sync(&self) -> bool {
        match (&self.source, &self.destination) {
            (Some(s), Some(d)) => {
                s.rows == d.rows
                    && match (&s.watermark, &d.watermark) {
                        (Some(a), Some(b)) => a.compare(b) == Some(std::cmp::Ordering::Equal),
                        (None, None) => true,
                        _ => false,
                    }
            }
            _ => false,
        }
    }

    /// Single-line human readable rendering.
    pub fn summary_line(&self) -> String {
        fn side(snapshot: &Option<SideSnapshot>) -> String {
            match snapshot {
                Some(s) => format!("{} rows, max {}", s.rows, display_cursor(s.watermark.as_ref())),
                None => "missing".to_string(),
            }
        }
        format!(
            "{}: source [{}] destination [{}]{}",
            self.table,
            side(&self.source),
            side(&self.destination),
            if self.in_sync() { "" } else { " (differs)" }
        )
    }
}

fn watermark_column(spec: &TableSpec) -> Option<&str> {
    match spec {
        TableSpec::Incremental(spec) => Some(spec.watermark_column.as_str()),
        TableSpec::FullRefresh(spec) => spec.load_options.sortkey.as_deref(),
    }
}

async fn snapshot_side<H>(table: &Table<'_, H>, column: Option<&str>) -> Result<Option<SideSnapshot>>
where
    H: TableHandle + ?Sized,
{
    if !table.exists().await? {
        return Ok(None);
    }
    let rows = table.row_count().await?;
    let watermark = match column {
        Some(column) if table.has_column(column).await? => table.max_value(column).await?,
        _ => None,
    };
    Ok(Some(SideSnapshot { watermark, rows }))
}

/// Snapshot one configured table. Issues read-only queries only.
pub async fn compare_table<S, D>(
    source: &S,
    destination: &D,
    spec: &TableSpec,
    snap_time: DateTime<Utc>,
) -> Result<Comparison>
where
    S: TableHandle + ?Sized,
    D: TableHandle + ?Sized,
{
    let column = watermark_column(spec);
    let source_snapshot = snapshot_side(&Table::new(source, spec.source()), column)
        .await
        .with_context(|| format!("Failed to snapshot source table {}", spec.source()))?;
    let destination_snapshot = snapshot_side(&Table::new(destination, spec.destination()), column)
        .await
        .with_context(|| {
            format!(
                "Failed to snapshot destination table {}",
                spec.destination()
            )
        })?;

    Ok(Comparison {
        snap_time,
        table: spec.source().to_string(),
        watermark_column: column.map(str::to_string),
        source: source_snapshot,
        destination: destination_snapshot,
    })
}

/// Append comparisons to a JSON lines history file, creating it if needed.
pub fn append_history(path: &Path, comparisons: &[Comparison]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open history file {}", path.display()))?;

    for comparison in comparisons {
        let line = serde_json::to_string(comparison).context("Failed to serialize comparison")?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to write history file {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use crate::sync::SyncSpec;
    use crate::table::{ColumnDef, ColumnType, LoadOptions, TableRef};

    fn spec() -> TableSpec {
        TableSpec::Incremental(SyncSpec {
            source: TableRef::new(None, "events"),
            destination: TableRef::new(None, "events_copy"),
            primary_key: "id".to_string(),
            watermark_column: "seq".to_string(),
            chunk_size: None,
            distinct_check: true,
            load_options: LoadOptions::default(),
        })
    }

    fn seed(db: &MemoryDatabase, name: &str, n: i64) {
        db.create_table(
            &TableRef::new(None, name),
            vec![
                ColumnDef::new("id", ColumnType::BigInt),
                ColumnDef::new("seq", ColumnType::BigInt),
            ],
            (1..=n).map(|i| vec![Value::Int(i), Value::Int(i * 10)]).collect(),
        );
    }

    #[tokio::test]
    async fn test_compare_reports_both_sides() {
        let source = MemoryDatabase::new();
        let destination = MemoryDatabase::new();
        seed(&source, "events", 4);
        seed(&destination, "events_copy", 3);

        let comparison = compare_table(&source, &destination, &spec(), Utc::now())
            .await
            .unwrap();

        assert_eq!(
            comparison.source,
            Some(SideSnapshot {
                watermark: Some(Value::Int(40)),
                rows: 4
            })
        );
        assert_eq!(comparison.destination.as_ref().unwrap().rows, 3);
        assert!(!comparison.in_sync());
        assert!(comparison.summary_line().contains("(differs)"));
        // Read-only
        assert_eq!(destination.calls(), Default::default());
    }

    #[tokio::test]
    async fn test_compare_missing_destination() {
        let source = MemoryDatabase::new();
        let destination = MemoryDatabase::new();
        seed(&source, "events", 2);

        let comparison = compare_table(&source, &destination, &spec(), Utc::now())
            .await
            .unwrap();
        assert!(comparison.destination.is_none());
        assert!(comparison.summary_line().contains("destination [missing]"));
    }

    #[tokio::test]
    async fn test_append_history_writes_json_lines() {
        let source = MemoryDatabase::new();
        seed(&source, "events", 2);
        seed(&source, "events_copy", 2);
        let comparison = compare_table(&source, &source, &spec(), Utc::now())
            .await
            .unwrap();
        assert!(comparison.in_sync());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        append_history(&path, &[comparison.clone()]).unwrap();
        append_history(&path, &[comparison]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["table"], "events");
        assert_eq!(parsed["source"]["rows"], 2);
        assert_eq!(parsed["source"]["watermark"], 20);
    }
}
