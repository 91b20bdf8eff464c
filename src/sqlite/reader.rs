// ABOUTME: SQLite table introspection and watermark-ordered page reads
// ABOUTME: Synchronous functions over a rusqlite Connection, called behind the handle's mutex

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use super::{sql_param, table_sql};
use crate::handle::PageRequest;
use crate::table::{ColumnDef, ColumnType, TableRef};
use crate::utils::quote_ident;
use crate::value::{RowSet, Value};

/// Convert one SQLite cell to a [`Value`] by its storage class.
///
/// SQLite has no native temporal type; timestamps come back as text and are
/// ordered against other backends' temporals by [`Value::compare`].
pub fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

/// Check whether a table exists
pub fn table_exists(conn: &Connection, table: &TableRef) -> Result<bool> {
    let master = match &table.schema {
        Some(schema) => format!("{}.sqlite_master", quote_ident(schema)),
        None => "sqlite_master".to_string(),
    };
    let query = format!(
        "SELECT COUNT(*) FROM {} WHERE type = 'table' AND name = ?",
        master
    );
    let count: i64 = conn
        .query_row(&query, [&table.name], |row| row.get(0))
        .with_context(|| format!("Failed to check whether table '{}' exists", table))?;
    Ok(count > 0)
}

/// Get row count for a specific table
pub fn get_table_row_count(conn: &Connection, table: &TableRef) -> Result<u64> {
    tracing::debug!("Getting row count for table '{}'", table);

    let query = format!("SELECT COUNT(*) FROM {}", table_sql(table));
    let count: i64 = conn
        .query_row(&query, [], |row| row.get(0))
        .with_context(|| format!("Failed to count rows in table '{}'", table))?;

    Ok(count as u64)
}

/// Count rows whose `column` is at or above `lower_bound`.
pub fn count_since(
    conn: &Connection,
    table: &TableRef,
    column: &str,
    lower_bound: &Value,
) -> Result<u64> {
    let query = format!(
        "SELECT COUNT(*) FROM {} WHERE {} >= ?",
        table_sql(table),
        quote_ident(column)
    );
    let count: i64 = conn
        .query_row(&query, [sql_param(lower_bound)], |row| row.get(0))
        .with_context(|| {
            format!(
                "Failed to count rows in '{}' with {} >= {}",
                table, column, lower_bound
            )
        })?;
    Ok(count as u64)
}

/// Maximum value of a column, `None` when the table is empty.
pub fn max_value(conn: &Connection, table: &TableRef, column: &str) -> Result<Option<Value>> {
    let query = format!("SELECT MAX({}) FROM {}", quote_ident(column), table_sql(table));
    let value = conn
        .query_row(&query, [], |row| Ok(value_from_sql(row.get_ref(0)?)))
        .with_context(|| format!("Failed to read MAX({}) from '{}'", column, table))?;
    Ok(if value.is_null() { None } else { Some(value) })
}

/// Check whether every row has a distinct value in `column`
///
/// Compares COUNT(column) with COUNT(DISTINCT column). NULLs are ignored
/// by both, so they never count as duplicates.
pub fn column_is_distinct(conn: &Connection, table: &TableRef, column: &str) -> Result<bool> {
    let quoted = quote_ident(column);
    let query = format!(
        "SELECT COUNT({}) = COUNT(DISTINCT {}) FROM {}",
        quoted,
        quoted,
        table_sql(table)
    );
    let distinct: bool = conn
        .query_row(&query, [], |row| row.get(0))
        .with_context(|| format!("Failed to check distinct values of {} on '{}'", column, table))?;
    Ok(distinct)
}

/// Column definitions from `PRAGMA table_info`. Empty when the table does not exist.
pub fn get_table_columns(conn: &Connection, table: &TableRef) -> Result<Vec<ColumnDef>> {
    let query = match &table.schema {
        Some(schema) => format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema),
            quote_ident(&table.name)
        ),
        None => format!("PRAGMA table_info({})", quote_ident(&table.name)),
    };

    let mut stmt = conn
        .prepare(&query)
        .with_context(|| format!("Failed to read columns of '{}'", table))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            let not_null: bool = row.get(3)?;
            Ok(ColumnDef {
                name,
                column_type: ColumnType::from_type_name(&declared),
                nullable: !not_null,
            })
        })
        .with_context(|| format!("Failed to query columns of '{}'", table))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to collect columns of '{}'", table))?;

    Ok(columns)
}

/// Read one page of rows ordered by watermark, then tie breakers.
///
/// The lower bound is bound as a parameter. NULL watermarks never satisfy
/// the bound, so they only appear on unbounded scans.
pub fn read_page(conn: &Connection, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
    let mut order_by = quote_ident(&request.watermark_column);
    for tie in &request.tie_breakers {
        order_by.push_str(", ");
        order_by.push_str(&quote_ident(tie));
    }

    let mut params: Vec<rusqlite::types::Value> = Vec::with_capacity(3);
    let filter = match &request.lower_bound {
        Some(bound) => {
            params.push(sql_param(bound));
            format!(" WHERE {} >= ?", quote_ident(&request.watermark_column))
        }
        None => String::new(),
    };
    params.push(rusqlite::types::Value::Integer(request.limit as i64));
    params.push(rusqlite::types::Value::Integer(request.offset as i64));

    let query = format!(
        "SELECT * FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
        table_sql(table),
        filter,
        order_by
    );

    let mut stmt = conn
        .prepare(&query)
        .with_context(|| format!("Failed to prepare page query for table '{}'", table))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();

    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|idx| row.get_ref(idx).map(value_from_sql))
                .collect::<Result<Vec<_>, _>>()
        })
        .with_context(|| format!("Failed to query page from table '{}'", table))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to collect page from table '{}'", table))?;

    tracing::debug!(
        "Read page of {} rows from '{}' (offset={})",
        rows.len(),
        table,
        request.offset
    );

    Ok(RowSet { columns, rows })
}
