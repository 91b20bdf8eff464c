// ABOUTME: SQLite backend - file databases as sync source or destination
// ABOUTME: Wraps one rusqlite Connection behind a mutex and implements the handle traits

pub mod reader;
pub mod writer;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::handle::{Backend, DestinationHandle, PageRequest, SourceHandle, TableHandle};
use crate::table::{ColumnDef, LoadOptions, TableRef};
use crate::utils::quote_ident;
use crate::value::{RowSet, Value};

/// Layout used for timestamps stored as text, chosen so text order matches time order.
const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub(crate) fn table_sql(table: &TableRef) -> String {
    table.quoted(quote_ident)
}

/// Convert a [`Value`] to a SQLite parameter.
///
/// Temporals are stored as ISO text, zoned timestamps normalised to UTC.
pub(crate) fn sql_param(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(v) => Sql::Integer(i64::from(*v)),
        Value::Int(v) => Sql::Integer(*v),
        Value::Float(v) => Sql::Real(*v),
        Value::Decimal(v) => Sql::Text(v.to_string()),
        Value::Text(v) => Sql::Text(v.clone()),
        Value::Bytes(v) => Sql::Blob(v.clone()),
        Value::Date(v) => Sql::Text(v.format("%Y-%m-%d").to_string()),
        Value::Timestamp(v) => Sql::Text(v.format(TIMESTAMP_TEXT_FORMAT).to_string()),
        Value::TimestampTz(v) => Sql::Text(v.naive_utc().format(TIMESTAMP_TEXT_FORMAT).to_string()),
        Value::Json(v) => Sql::Text(v.to_string()),
        Value::Uuid(v) => Sql::Text(v.to_string()),
    }
}

/// Open a SQLite database file, creating it if it does not exist.
///
/// The path is canonicalized when the file already exists so log lines show
/// the real location. `:memory:` opens a private in-memory database.
pub fn open_sqlite(path: &str) -> Result<Connection> {
    if path.trim().is_empty() {
        bail!("SQLite path cannot be empty");
    }
    if path == ":memory:" {
        return Connection::open_in_memory().context("Failed to open in-memory SQLite database");
    }

    let path = path.strip_prefix("sqlite://").unwrap_or(path);
    let resolved: PathBuf = match Path::new(path).canonicalize() {
        Ok(canonical) => canonical,
        Err(_) => PathBuf::from(path),
    };

    tracing::debug!("Opening SQLite database {}", resolved.display());
    let conn = Connection::open(&resolved)
        .with_context(|| format!("Failed to open SQLite database {}", resolved.display()))?;
    Ok(conn)
}

/// A SQLite database usable as source or destination.
pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::from_connection(open_sqlite(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TableHandle for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::SQLite
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        reader::table_exists(&self.lock(), table)
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        reader::get_table_row_count(&self.lock(), table)
    }

    async fn count_since(
        &self,
        table: &TableRef,
        column: &str,
        lower_bound: &Value,
    ) -> Result<u64> {
        reader::count_since(&self.lock(), table, column, lower_bound)
    }

    async fn max_value(&self, table: &TableRef, column: &str) -> Result<Option<Value>> {
        reader::max_value(&self.lock(), table, column)
    }

    async fn is_distinct(&self, table: &TableRef, column: &str) -> Result<bool> {
        reader::column_is_distinct(&self.lock(), table, column)
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>> {
        reader::get_table_columns(&self.lock(), table)
    }
}

#[async_trait]
impl SourceHandle for SqliteDatabase {
    async fn fetch_page(&self, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
        reader::read_page(&self.lock(), table, request)
    }
}

#[async_trait]
impl DestinationHandle for SqliteDatabase {
    async fn upsert(
        &self,
        rows: &RowSet,
        table: &TableRef,
        primary_key: &str,
        _options: &LoadOptions,
    ) -> Result<u64> {
        writer::write_rows(&mut self.lock(), table, rows, Some(primary_key))
    }

    async fn append(&self, rows: &RowSet, table: &TableRef) -> Result<u64> {
        writer::write_rows(&mut self.lock(), table, rows, None)
    }

    async fn replace_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
        options: &LoadOptions,
    ) -> Result<()> {
        writer::replace_table(&self.lock(), table, columns, primary_key, options.if_exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_sql_param_temporals_are_ordered_text() {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(
            sql_param(&Value::Timestamp(naive)),
            rusqlite::types::Value::Text("2024-03-01 09:30:00".to_string())
        );
        let zoned = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(
            sql_param(&Value::TimestampTz(zoned)),
            rusqlite::types::Value::Text("2024-03-01 09:30:00".to_string())
        );
        assert_eq!(
            sql_param(&Value::Bool(true)),
            rusqlite::types::Value::Integer(1)
        );
    }

    #[test]
    fn test_open_sqlite_rejects_empty_path() {
        assert!(open_sqlite("").is_err());
        assert!(open_sqlite(":memory:").is_ok());
    }

    #[tokio::test]
    async fn test_handle_reports_missing_table() {
        let db = SqliteDatabase::open(":memory:").unwrap();
        let table = TableRef::new(None, "missing");
        assert!(!db.table_exists(&table).await.unwrap());
        assert!(db.columns(&table).await.unwrap().is_empty());
        assert_eq!(db.backend(), Backend::SQLite);
    }
}
