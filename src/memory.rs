// ABOUTME: In-process table store implementing both handle traits
// ABOUTME: Backs the test suite; records calls and can inject failures

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::handle::{Backend, DestinationHandle, PageRequest, SourceHandle, TableHandle};
use crate::table::{ColumnDef, IfExists, LoadOptions, TableRef};
use crate::value::{RowSet, Value};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
    /// Set by `replace_table`; enforced on append like a UNIQUE constraint.
    unique_key: Option<String>,
}

impl MemoryTable {
    fn index_of(&self, table: &TableRef, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| anyhow!("column {} does not exist on {}", column, table))
    }
}

/// Counters of the calls a [`MemoryDatabase`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_page: usize,
    pub upsert: usize,
    pub append: usize,
    pub replace_table: usize,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<TableRef, MemoryTable>,
    calls: CallCounts,
    fetch_failures: usize,
    upsert_failures: usize,
    pages: Vec<PageRequest>,
}

/// A cloneable handle to a shared set of in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the table state from the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create (or replace) a table with the given columns and rows.
    pub fn create_table(&self, table: &TableRef, columns: Vec<ColumnDef>, rows: Vec<Vec<Value>>) {
        self.lock()
            .tables
            .insert(
                table.clone(),
                MemoryTable {
                    columns,
                    rows,
                    unique_key: None,
                },
            );
    }

    /// Append rows directly, bypassing the handle traits.
    pub fn insert_rows(&self, table: &TableRef, rows: Vec<Vec<Value>>) -> Result<()> {
        let mut inner = self.lock();
        let stored = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        stored.rows.extend(rows);
        Ok(())
    }

    pub fn drop_table(&self, table: &TableRef) {
        self.lock().tables.remove(table);
    }

    /// Snapshot of a table's rows, sorted by `column` for stable comparisons.
    pub fn rows_sorted_by(&self, table: &TableRef, column: &str) -> Result<Vec<Vec<Value>>> {
        let inner = self.lock();
        let stored = inner
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        let idx = stored.index_of(table, column)?;
        let mut rows = stored.rows.clone();
        rows.sort_by(|a, b| a[idx].compare(&b[idx]).unwrap_or(Ordering::Equal));
        Ok(rows)
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Every page request served so far, in order.
    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.lock().pages.clone()
    }

    /// Make the next `count` page fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().fetch_failures = count;
    }

    /// Make the next `count` upserts fail.
    pub fn fail_next_upserts(&self, count: usize) {
        self.lock().upsert_failures = count;
    }
}

fn write_rows(
    stored: &mut MemoryTable,
    table: &TableRef,
    rows: &RowSet,
    key: Option<&str>,
) -> Result<u64> {
    // Map incoming columns onto the stored layout
    let positions = stored
        .columns
        .iter()
        .map(|c| rows.column_index(&c.name))
        .collect::<Vec<_>>();
    for column in &rows.columns {
        stored.index_of(table, column)?;
    }
    let key_idx = match key {
        Some(key) => Some(stored.index_of(table, key)?),
        None => None,
    };

    for row in &rows.rows {
        let record: Vec<Value> = positions
            .iter()
            .map(|p| p.map(|i| row[i].clone()).unwrap_or(Value::Null))
            .collect();

        let existing = key_idx.and_then(|k| {
            stored
                .rows
                .iter()
                .position(|r| r[k].compare(&record[k]) == Some(Ordering::Equal))
        });
        match existing {
            Some(pos) => stored.rows[pos] = record,
            None => stored.rows.push(record),
        }
    }

    Ok(rows.len() as u64)
}

/// Reject rows whose unique key value is already stored or repeats in the batch.
/// NULLs never collide.
fn check_unique(stored: &MemoryTable, table: &TableRef, rows: &RowSet, key: &str) -> Result<()> {
    let stored_idx = stored.index_of(table, key)?;
    let Some(incoming_idx) = rows.column_index(key) else {
        return Ok(());
    };
    let mut seen: Vec<&Value> = stored.rows.iter().map(|r| &r[stored_idx]).collect();
    for row in &rows.rows {
        let value = &row[incoming_idx];
        if value.is_null() {
            continue;
        }
        if seen
            .iter()
            .any(|existing| existing.compare(value) == Some(Ordering::Equal))
        {
            bail!("UNIQUE constraint failed: {}.{} = {}", table, key, value);
        }
        seen.push(value);
    }
    Ok(())
}

#[async_trait]
impl TableHandle for MemoryDatabase {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        let inner = self.lock();
        let stored = inner
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        Ok(stored.rows.len() as u64)
    }

    async fn count_since(
        &self,
        table: &TableRef,
        column: &str,
        lower_bound: &Value,
    ) -> Result<u64> {
        let inner = self.lock();
        let stored = inner
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        let idx = stored.index_of(table, column)?;
        Ok(stored
            .rows
            .iter()
            .filter(|r| {
                matches!(
                    r[idx].compare(lower_bound),
                    Some(Ordering::Greater | Ordering::Equal)
                )
            })
            .count() as u64)
    }

    async fn max_value(&self, table: &TableRef, column: &str) -> Result<Option<Value>> {
        let inner = self.lock();
        let stored = inner
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        let idx = stored.index_of(table, column)?;
        let max = stored
            .rows
            .iter()
            .map(|r| &r[idx])
            .filter(|v| !v.is_null())
            .max_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
        Ok(max.cloned())
    }

    async fn is_distinct(&self, table: &TableRef, column: &str) -> Result<bool> {
        let inner = self.lock();
        let stored = inner
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        let idx = stored.index_of(table, column)?;
        let values: Vec<&Value> = stored.rows.iter().map(|r| &r[idx]).collect();
        for (i, a) in values.iter().enumerate() {
            if values[i + 1..]
                .iter()
                .any(|b| a.compare(b) == Some(Ordering::Equal))
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceHandle for MemoryDatabase {
    async fn fetch_page(&self, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
        let mut inner = self.lock();
        inner.calls.fetch_page += 1;
        inner.pages.push(request.clone());
        if inner.fetch_failures > 0 {
            inner.fetch_failures -= 1;
            bail!("injected fetch failure on {}", table);
        }

        let stored = inner
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        let wm = stored.index_of(table, &request.watermark_column)?;
        let ties = request
            .tie_breakers
            .iter()
            .map(|column| stored.index_of(table, column))
            .collect::<Result<Vec<_>>>()?;

        let mut rows: Vec<&Vec<Value>> = stored
            .rows
            .iter()
            .filter(|r| match &request.lower_bound {
                Some(bound) => matches!(
                    r[wm].compare(bound),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                None => true,
            })
            .collect();
        rows.sort_by(|a, b| {
            ties.iter().fold(
                a[wm].compare(&b[wm]).unwrap_or(Ordering::Equal),
                |order, &t| order.then(a[t].compare(&b[t]).unwrap_or(Ordering::Equal)),
            )
        });

        Ok(RowSet {
            columns: stored.columns.iter().map(|c| c.name.clone()).collect(),
            rows: rows
                .into_iter()
                .skip(request.offset as usize)
                .take(request.limit as usize)
                .cloned()
                .collect(),
        })
    }
}

#[async_trait]
impl DestinationHandle for MemoryDatabase {
    async fn upsert(
        &self,
        rows: &RowSet,
        table: &TableRef,
        primary_key: &str,
        _options: &LoadOptions,
    ) -> Result<u64> {
        let mut inner = self.lock();
        inner.calls.upsert += 1;
        if inner.upsert_failures > 0 {
            inner.upsert_failures -= 1;
            bail!("injected upsert failure on {}", table);
        }
        let stored = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        write_rows(stored, table, rows, Some(primary_key))
    }

    async fn append(&self, rows: &RowSet, table: &TableRef) -> Result<u64> {
        let mut inner = self.lock();
        inner.calls.append += 1;
        let stored = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("table {} does not exist", table))?;
        if let Some(key) = stored.unique_key.clone() {
            check_unique(stored, table, rows, &key)?;
        }
        write_rows(stored, table, rows, None)
    }

    async fn replace_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
        options: &LoadOptions,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.replace_table += 1;
        let truncated = match (options.if_exists, inner.tables.get_mut(table)) {
            (IfExists::Truncate, Some(existing)) => {
                existing.rows.clear();
                true
            }
            _ => false,
        };
        if !truncated {
            inner.tables.insert(
                table.clone(),
                MemoryTable {
                    columns: columns.to_vec(),
                    rows: Vec::new(),
                    unique_key: primary_key.map(str::to_string),
                },
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnType;

    fn events() -> TableRef {
        TableRef::new(None, "events")
    }

    fn seeded() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table(
            &events(),
            vec![
                ColumnDef::new("id", ColumnType::BigInt),
                ColumnDef::new("seq", ColumnType::BigInt),
            ],
            vec![
                vec![Value::Int(3), Value::Int(2)],
                vec![Value::Int(1), Value::Int(1)],
                vec![Value::Int(2), Value::Int(2)],
            ],
        );
        db
    }

    fn request(lower_bound: Option<Value>, offset: u64, limit: u64) -> PageRequest {
        PageRequest {
            watermark_column: "seq".to_string(),
            tie_breakers: vec!["id".to_string()],
            lower_bound,
            offset,
            limit,
        }
    }

    #[tokio::test]
    async fn test_fetch_page_orders_by_watermark_then_key() {
        let db = seeded();
        let page = db.fetch_page(&events(), &request(None, 0, 10)).await.unwrap();
        let ids: Vec<&Value> = page.column_values("id").collect();
        assert_eq!(ids, vec![&Value::Int(1), &Value::Int(2), &Value::Int(3)]);
    }

    #[tokio::test]
    async fn test_fetch_page_inclusive_lower_bound() {
        let db = seeded();
        let page = db
            .fetch_page(&events(), &request(Some(Value::Int(2)), 0, 10))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let page = db
            .fetch_page(&events(), &request(Some(Value::Int(2)), 1, 10))
            .await
            .unwrap();
        assert_eq!(page.column_values("id").next(), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let db = seeded();
        let mut rows = RowSet::new(vec!["id".to_string(), "seq".to_string()]);
        rows.rows.push(vec![Value::Int(1), Value::Int(9)]);
        rows.rows.push(vec![Value::Int(4), Value::Int(9)]);

        db.upsert(&rows, &events(), "id", &LoadOptions::default())
            .await
            .unwrap();

        assert_eq!(db.row_count(&events()).await.unwrap(), 4);
        assert_eq!(
            db.max_value(&events(), "seq").await.unwrap(),
            Some(Value::Int(9))
        );
        assert_eq!(db.calls().upsert, 1);
    }

    #[tokio::test]
    async fn test_is_distinct_and_count_since() {
        let db = seeded();
        assert!(db.is_distinct(&events(), "id").await.unwrap());
        assert!(!db.is_distinct(&events(), "seq").await.unwrap());
        assert_eq!(
            db.count_since(&events(), "seq", &Value::Int(2)).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_injected_fetch_failure() {
        let db = seeded();
        db.fail_next_fetches(1);
        assert!(db.fetch_page(&events(), &request(None, 0, 10)).await.is_err());
        assert!(db.fetch_page(&events(), &request(None, 0, 10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_table_truncate_keeps_columns() {
        let db = seeded();
        let options = LoadOptions {
            if_exists: IfExists::Truncate,
            ..Default::default()
        };
        db.replace_table(&events(), &[], None, &options).await.unwrap();

        assert_eq!(db.row_count(&events()).await.unwrap(), 0);
        assert_eq!(db.columns(&events()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_append_enforces_unique_key_from_replace_table() {
        let db = MemoryDatabase::new();
        let columns = vec![
            ColumnDef::new("id", ColumnType::BigInt),
            ColumnDef::new("seq", ColumnType::BigInt),
        ];
        db.replace_table(&events(), &columns, Some("id"), &LoadOptions::default())
            .await
            .unwrap();

        let mut rows = RowSet::new(vec!["id".to_string(), "seq".to_string()]);
        rows.rows.push(vec![Value::Int(1), Value::Int(1)]);
        rows.rows.push(vec![Value::Int(1), Value::Int(2)]);
        let err = db.append(&rows, &events()).await.unwrap_err();
        assert!(err.to_string().contains("UNIQUE constraint failed"));

        // Without a unique key the same rows go in as they are
        db.replace_table(&events(), &columns, None, &LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(db.append(&rows, &events()).await.unwrap(), 2);
        assert_eq!(db.row_count(&events()).await.unwrap(), 2);
    }
}
