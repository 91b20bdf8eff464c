// ABOUTME: MySQL writes - multi-row upserts, appends and destination table replacement
// ABOUTME: Upserts use ON DUPLICATE KEY UPDATE against the unique key created for the table

use anyhow::{bail, Context, Result};
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, TxOpts};

use super::convert::to_params;
use super::{reader, table_sql};
use crate::table::{ColumnDef, ColumnType, IfExists, TableRef};
use crate::utils::quote_mysql_ident;
use crate::value::RowSet;

/// MySQL accepts at most 65535 placeholders per prepared statement.
const MAX_PARAMS_PER_STATEMENT: usize = 60_000;

pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_PARAMS_PER_STATEMENT / column_count.max(1)).max(1)
}

/// Build a multi-row INSERT, upserting on `primary_key` when given.
pub fn build_insert_query(
    table: &TableRef,
    columns: &[String],
    row_count: usize,
    primary_key: Option<&str>,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_mysql_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let row_template = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row_template.as_str(); row_count].join(", ");

    let mut query = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table_sql(table),
        column_list,
        values
    );

    if let Some(key) = primary_key {
        let updates = columns
            .iter()
            .filter(|c| c.as_str() != key)
            .map(|c| {
                let quoted = quote_mysql_ident(c);
                format!("{} = VALUES({})", quoted, quoted)
            })
            .collect::<Vec<_>>();
        let updates = if updates.is_empty() {
            let quoted = quote_mysql_ident(key);
            format!("{} = {}", quoted, quoted)
        } else {
            updates.join(", ")
        };
        query.push_str(&format!(" ON DUPLICATE KEY UPDATE {}", updates));
    }

    query
}

/// Write a batch in one transaction, chunked to stay under the placeholder limit.
pub async fn write_rows(
    conn: &mut Conn,
    table: &TableRef,
    rows: &RowSet,
    primary_key: Option<&str>,
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    if let Some(key) = primary_key {
        if rows.column_index(key).is_none() {
            bail!("Primary key column {} is missing from the rows for {}", key, table);
        }
    }

    let width = rows.columns.len();
    let mut tx = conn
        .start_transaction(TxOpts::default())
        .await
        .with_context(|| format!("Failed to begin transaction on {}", table))?;

    for chunk in rows.rows.chunks(rows_per_statement(width)) {
        let query = build_insert_query(table, &rows.columns, chunk.len(), primary_key);
        let params = to_params(chunk, width)?;
        tx.exec_drop(query, Params::Positional(params))
            .await
            .with_context(|| format!("Failed to write batch into {}", table))?;
    }

    tx.commit()
        .await
        .with_context(|| format!("Failed to commit batch into {}", table))?;

    Ok(rows.len() as u64)
}

/// DDL type for a column. Key columns get bounded types so they can be indexed.
pub fn column_type_sql(column_type: ColumnType, is_key: bool) -> &'static str {
    match column_type {
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::SmallInt => "SMALLINT",
        ColumnType::Integer => "INT",
        ColumnType::BigInt => "BIGINT",
        ColumnType::Real => "FLOAT",
        ColumnType::Double => "DOUBLE",
        ColumnType::Numeric => "DECIMAL(38,10)",
        ColumnType::Text if is_key => "VARCHAR(255)",
        ColumnType::Text => "LONGTEXT",
        ColumnType::Date => "DATE",
        ColumnType::Timestamp | ColumnType::TimestampTz => "DATETIME(6)",
        ColumnType::Json => "JSON",
        ColumnType::Bytes if is_key => "VARBINARY(255)",
        ColumnType::Bytes => "LONGBLOB",
        ColumnType::Uuid => "CHAR(36)",
    }
}

pub fn build_create_table(table: &TableRef, columns: &[ColumnDef], primary_key: Option<&str>) -> String {
    let mut definitions = columns
        .iter()
        .map(|c| {
            let is_key = primary_key == Some(c.name.as_str());
            let mut definition = format!(
                "{} {}",
                quote_mysql_ident(&c.name),
                column_type_sql(c.column_type, is_key)
            );
            if !c.nullable {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect::<Vec<_>>();
    if let Some(key) = primary_key {
        definitions.push(format!("UNIQUE KEY ({})", quote_mysql_ident(key)));
    }
    format!("CREATE TABLE {} ({})", table_sql(table), definitions.join(", "))
}

/// Drop or truncate the table, then create it if needed.
pub async fn replace_table(
    conn: &mut Conn,
    table: &TableRef,
    columns: &[ColumnDef],
    primary_key: Option<&str>,
    if_exists: IfExists,
) -> Result<()> {
    if reader::table_exists(conn, table).await? {
        match if_exists {
            IfExists::Drop => {
                tracing::info!("Dropping existing table {}", table);
                conn.query_drop(format!("DROP TABLE {}", table_sql(table)))
                    .await
                    .with_context(|| format!("Failed to drop table {}", table))?;
            }
            IfExists::Truncate => {
                tracing::info!("Truncating existing table {}", table);
                conn.query_drop(format!("TRUNCATE TABLE {}", table_sql(table)))
                    .await
                    .with_context(|| format!("Failed to truncate table {}", table))?;
                return Ok(());
            }
        }
    }

    conn.query_drop(build_create_table(table, columns, primary_key))
        .await
        .with_context(|| format!("Failed to create table {}", table))?;
    Ok(())
}
