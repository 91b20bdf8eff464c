// ABOUTME: MySQL table introspection and watermark-ordered page reads
// ABOUTME: All queries use the binary protocol so result values keep their column types

use anyhow::{Context, Result};
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Row};

use super::convert::{row_to_values, to_mysql, value_from_mysql};
use super::table_sql;
use crate::handle::PageRequest;
use crate::table::{ColumnDef, ColumnType, TableRef};
use crate::utils::quote_mysql_ident;
use crate::value::{RowSet, Value};

/// Check if a table exists. An unqualified name is looked up in `DATABASE()`.
pub async fn table_exists(conn: &mut Conn, table: &TableRef) -> Result<bool> {
    let count: Option<u64> = conn
        .exec_first(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ?",
            (table.schema.clone(), table.name.clone()),
        )
        .await
        .with_context(|| format!("Failed to check if table {} exists", table))?;
    Ok(count.unwrap_or(0) > 0)
}

pub async fn get_row_count(conn: &mut Conn, table: &TableRef) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", table_sql(table));
    let count: Option<u64> = conn
        .exec_first(query, ())
        .await
        .with_context(|| format!("Failed to count rows in {}", table))?;
    Ok(count.unwrap_or(0))
}

/// Count rows with `column >= lower_bound`.
pub async fn count_since(
    conn: &mut Conn,
    table: &TableRef,
    column: &str,
    lower_bound: &Value,
) -> Result<u64> {
    let query = format!(
        "SELECT COUNT(*) FROM {} WHERE {} >= ?",
        table_sql(table),
        quote_mysql_ident(column)
    );
    let count: Option<u64> = conn
        .exec_first(query, Params::Positional(vec![to_mysql(lower_bound)]))
        .await
        .with_context(|| format!("Failed to count rows in {} since {}", table, lower_bound))?;
    Ok(count.unwrap_or(0))
}

pub async fn max_value(conn: &mut Conn, table: &TableRef, column: &str) -> Result<Option<Value>> {
    let query = format!(
        "SELECT MAX({}) FROM {}",
        quote_mysql_ident(column),
        table_sql(table)
    );
    let row: Option<Row> = conn
        .exec_first(query, ())
        .await
        .with_context(|| format!("Failed to read MAX({}) from {}", column, table))?;

    let Some(mut row) = row else {
        return Ok(None);
    };
    let columns = row.columns();
    let value = match (row.take::<mysql_async::Value, _>(0), columns.first()) {
        (Some(value), Some(col)) => value_from_mysql(value, col)?,
        _ => Value::Null,
    };
    Ok(if value.is_null() { None } else { Some(value) })
}

/// COUNT vs COUNT(DISTINCT); NULLs are ignored by both.
pub async fn column_is_distinct(conn: &mut Conn, table: &TableRef, column: &str) -> Result<bool> {
    let quoted = quote_mysql_ident(column);
    let query = format!(
        "SELECT COUNT({}) = COUNT(DISTINCT {}) FROM {}",
        quoted,
        quoted,
        table_sql(table)
    );
    let distinct: Option<i64> = conn
        .exec_first(query, ())
        .await
        .with_context(|| format!("Failed to check distinct values of {} on {}", column, table))?;
    Ok(distinct.unwrap_or(1) == 1)
}

/// Map an `information_schema.columns.column_type` string to the canonical type.
///
/// `tinyint(1)` is MySQL's boolean.
pub fn column_type_from_mysql(column_type: &str) -> ColumnType {
    if column_type.trim().eq_ignore_ascii_case("tinyint(1)") {
        return ColumnType::Boolean;
    }
    ColumnType::from_type_name(column_type)
}

/// Extract column metadata in ordinal order. Empty when the table does not exist.
pub async fn get_table_columns(conn: &mut Conn, table: &TableRef) -> Result<Vec<ColumnDef>> {
    let rows: Vec<(String, String, String)> = conn
        .exec(
            "SELECT column_name, column_type, is_nullable
             FROM information_schema.columns
             WHERE table_schema = COALESCE(?, DATABASE()) AND table_name = ?
             ORDER BY ordinal_position",
            (table.schema.clone(), table.name.clone()),
        )
        .await
        .with_context(|| format!("Failed to get columns for {}", table))?;

    Ok(rows
        .into_iter()
        .map(|(name, column_type, nullable)| ColumnDef {
            name,
            column_type: column_type_from_mysql(&column_type),
            nullable: nullable.eq_ignore_ascii_case("YES"),
        })
        .collect())
}

/// Build the page query. LIMIT and OFFSET are inlined integers.
pub fn build_page_query(table: &TableRef, request: &PageRequest) -> String {
    let watermark = quote_mysql_ident(&request.watermark_column);
    let mut query = format!("SELECT * FROM {}", table_sql(table));
    if request.lower_bound.is_some() {
        query.push_str(&format!(" WHERE {} >= ?", watermark));
    }
    query.push_str(&format!(" ORDER BY {}", watermark));
    for tie in &request.tie_breakers {
        query.push_str(&format!(", {}", quote_mysql_ident(tie)));
    }
    query.push_str(&format!(" LIMIT {} OFFSET {}", request.limit, request.offset));
    query
}

/// Read one page of rows ordered by watermark, then tie breakers.
pub async fn read_page(conn: &mut Conn, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
    let query = build_page_query(table, request);
    let params = match &request.lower_bound {
        Some(bound) => Params::Positional(vec![to_mysql(bound)]),
        None => Params::Empty,
    };
    let rows: Vec<Row> = conn
        .exec(query, params)
        .await
        .with_context(|| format!("Failed to read page from {} at offset {}", table, request.offset))?;

    let columns = match rows.first() {
        Some(row) => row
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect(),
        None => Vec::new(),
    };
    let rows = rows
        .into_iter()
        .map(row_to_values)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Failed to decode page from {}", table))?;

    tracing::debug!(
        "Read page of {} rows from {} (offset={})",
        rows.len(),
        table,
        request.offset
    );

    Ok(RowSet { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_page_query() {
        let request = PageRequest {
            watermark_column: "updated_at".to_string(),
            tie_breakers: vec!["id".to_string(), "sku".to_string()],
            lower_bound: Some(Value::Int(10)),
            offset: 0,
            limit: 500,
        };
        assert_eq!(
            build_page_query(&TableRef::new(Some("shop"), "orders"), &request),
            "SELECT * FROM `shop`.`orders` WHERE `updated_at` >= ? \
             ORDER BY `updated_at`, `id`, `sku` LIMIT 500 OFFSET 0"
        );
    }

    #[test]
    fn test_column_type_from_mysql() {
        assert_eq!(column_type_from_mysql("tinyint(1)"), ColumnType::Boolean);
        assert_eq!(column_type_from_mysql("tinyint(4)"), ColumnType::SmallInt);
        assert_eq!(column_type_from_mysql("datetime(6)"), ColumnType::Timestamp);
        assert_eq!(column_type_from_mysql("bigint unsigned"), ColumnType::BigInt);
        assert_eq!(column_type_from_mysql("longtext"), ColumnType::Text);
    }
}
