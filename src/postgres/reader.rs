// ABOUTME: PostgreSQL/Redshift table introspection and watermark-ordered page reads
// ABOUTME: Lower bounds are bound as parameters typed by the prepared statement

use anyhow::{Context, Result};
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::convert::{row_to_values, to_sql_param, value_from_row};
use super::table_sql;
use crate::handle::PageRequest;
use crate::table::{ColumnDef, ColumnType, TableRef};
use crate::utils::quote_ident;
use crate::value::{RowSet, Value};

/// Check if a table exists. An unqualified name is looked up in `current_schema()`.
pub async fn table_exists(client: &Client, table: &TableRef) -> Result<bool> {
    let query = "SELECT EXISTS (
        SELECT 1 FROM information_schema.tables
        WHERE table_schema = COALESCE($1::text, current_schema())
          AND table_name = $2
    )";

    let row = client
        .query_one(query, &[&table.schema, &table.name])
        .await
        .with_context(|| format!("Failed to check if table {} exists", table))?;

    Ok(row.get(0))
}

pub async fn get_row_count(client: &Client, table: &TableRef) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", table_sql(table));
    let row = client
        .query_one(&query, &[])
        .await
        .with_context(|| format!("Failed to count rows in {}", table))?;
    let count: i64 = row.get(0);
    Ok(count as u64)
}

/// Run a query with a single lower-bound parameter typed by the server.
async fn query_with_bound(
    client: &Client,
    query: &str,
    lower_bound: Option<&Value>,
) -> Result<Vec<tokio_postgres::Row>> {
    let stmt = client
        .prepare(query)
        .await
        .with_context(|| format!("Failed to prepare query: {}", query))?;

    let bound = match (lower_bound, stmt.params().first()) {
        (Some(value), Some(ty)) => Some(to_sql_param(value, ty)?),
        _ => None,
    };
    let params: Vec<&(dyn ToSql + Sync)> = bound
        .iter()
        .map(|v| v.as_ref() as &(dyn ToSql + Sync))
        .collect();

    Ok(client.query(&stmt, &params).await?)
}

/// Count rows with `column >= lower_bound`.
pub async fn count_since(
    client: &Client,
    table: &TableRef,
    column: &str,
    lower_bound: &Value,
) -> Result<u64> {
    let query = format!(
        "SELECT COUNT(*) FROM {} WHERE {} >= $1",
        table_sql(table),
        quote_ident(column)
    );
    let rows = query_with_bound(client, &query, Some(lower_bound))
        .await
        .with_context(|| format!("Failed to count rows in {} since {}", table, lower_bound))?;
    let count: i64 = rows.first().map(|row| row.get(0)).unwrap_or(0);
    Ok(count as u64)
}

pub async fn max_value(client: &Client, table: &TableRef, column: &str) -> Result<Option<Value>> {
    let query = format!("SELECT MAX({}) FROM {}", quote_ident(column), table_sql(table));
    let row = client
        .query_one(&query, &[])
        .await
        .with_context(|| format!("Failed to read MAX({}) from {}", column, table))?;
    let value = value_from_row(&row, 0)?;
    Ok(if value.is_null() { None } else { Some(value) })
}

/// COUNT vs COUNT(DISTINCT); NULLs are ignored by both.
pub async fn column_is_distinct(client: &Client, table: &TableRef, column: &str) -> Result<bool> {
    let quoted = quote_ident(column);
    let query = format!(
        "SELECT COUNT({}) = COUNT(DISTINCT {}) FROM {}",
        quoted,
        quoted,
        table_sql(table)
    );
    let row = client
        .query_one(&query, &[])
        .await
        .with_context(|| format!("Failed to check distinct values of {} on {}", column, table))?;
    Ok(row.get(0))
}

/// Extract column metadata in ordinal order. Empty when the table does not exist.
pub async fn get_table_columns(client: &Client, table: &TableRef) -> Result<Vec<ColumnDef>> {
    let rows = client
        .query(
            "SELECT column_name::text, data_type::text, is_nullable::text
             FROM information_schema.columns
             WHERE table_schema = COALESCE($1::text, current_schema())
               AND table_name = $2
             ORDER BY ordinal_position",
            &[&table.schema, &table.name],
        )
        .await
        .with_context(|| format!("Failed to get columns for {}", table))?;

    Ok(rows
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let nullable: String = row.get(2);
            ColumnDef {
                name,
                column_type: ColumnType::from_type_name(&data_type),
                nullable: nullable.eq_ignore_ascii_case("YES"),
            }
        })
        .collect())
}

/// Build the page query. LIMIT and OFFSET are inlined integers.
pub fn build_page_query(table: &TableRef, request: &PageRequest) -> String {
    let watermark = quote_ident(&request.watermark_column);
    let mut query = format!("SELECT * FROM {}", table_sql(table));
    if request.lower_bound.is_some() {
        query.push_str(&format!(" WHERE {} >= $1", watermark));
    }
    query.push_str(&format!(" ORDER BY {}", watermark));
    for tie in &request.tie_breakers {
        query.push_str(&format!(", {}", quote_ident(tie)));
    }
    query.push_str(&format!(
        " LIMIT {} OFFSET {}",
        request.limit, request.offset
    ));
    query
}

/// Read one page of rows ordered by watermark, then tie breakers.
pub async fn read_page(client: &Client, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
    let query = build_page_query(table, request);
    let rows = query_with_bound(client, &query, request.lower_bound.as_ref())
        .await
        .with_context(|| format!("Failed to read page from {} at offset {}", table, request.offset))?;

    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => Vec::new(),
    };
    let rows = rows
        .iter()
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
