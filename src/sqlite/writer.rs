// ABOUTME: SQLite writes - upsert, append and destination table replacement
// ABOUTME: Each batch is applied inside one transaction with a cached prepared statement

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use super::{reader, sql_param, table_sql};
use crate::table::{ColumnDef, ColumnType, IfExists, TableRef};
use crate::utils::quote_ident;
use crate::value::RowSet;

fn declared_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => "INTEGER",
        ColumnType::Real | ColumnType::Double => "REAL",
        ColumnType::Numeric => "NUMERIC",
        ColumnType::Date => "DATE",
        ColumnType::Timestamp => "TIMESTAMP",
        ColumnType::TimestampTz => "TIMESTAMPTZ",
        ColumnType::Bytes => "BLOB",
        ColumnType::Text | ColumnType::Json | ColumnType::Uuid => "TEXT",
    }
}

/// Build the INSERT statement for a batch, optionally upserting on `primary_key`.
///
/// The key column needs a unique constraint for `ON CONFLICT` to apply.
pub fn build_insert_query(table: &TableRef, columns: &[String], primary_key: Option<&str>) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let mut query = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table_sql(table),
        column_list,
        placeholders
    );

    if let Some(key) = primary_key {
        let updates = columns
            .iter()
            .filter(|c| c.as_str() != key)
            .map(|c| format!("{} = excluded.{}", quote_ident(c), quote_ident(c)))
            .collect::<Vec<_>>();
        if updates.is_empty() {
            query.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quote_ident(key)));
        } else {
            query.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                quote_ident(key),
                updates.join(", ")
            ));
        }
    }

    query
}

/// Write a batch of rows in one transaction. Returns rows written.
pub fn write_rows(
    conn: &mut Connection,
    table: &TableRef,
    rows: &RowSet,
    primary_key: Option<&str>,
) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    if let Some(key) = primary_key {
        if rows.column_index(key).is_none() {
            bail!("Primary key column {} is missing from the rows for '{}'", key, table);
        }
    }

    let query = build_insert_query(table, &rows.columns, primary_key);
    let tx = conn
        .transaction()
        .with_context(|| format!("Failed to begin transaction on '{}'", table))?;
    {
        let mut stmt = tx
            .prepare_cached(&query)
            .with_context(|| format!("Failed to prepare insert for '{}'", table))?;
        for row in &rows.rows {
            stmt.execute(rusqlite::params_from_iter(row.iter().map(sql_param)))
                .with_context(|| format!("Failed to write row into '{}'", table))?;
        }
    }
    tx.commit()
        .with_context(|| format!("Failed to commit batch into '{}'", table))?;

    Ok(rows.len() as u64)
}

/// Drop or truncate the table, then create it if needed.
pub fn replace_table(
    conn: &Connection,
    table: &TableRef,
    columns: &[ColumnDef],
    primary_key: Option<&str>,
    if_exists: IfExists,
) -> Result<()> {
    let exists = reader::table_exists(conn, table)?;

    if exists {
        match if_exists {
            IfExists::Drop => {
                tracing::info!("Dropping existing table '{}'", table);
                conn.execute(&format!("DROP TABLE {}", table_sql(table)), [])
                    .with_context(|| format!("Failed to drop table '{}'", table))?;
            }
            IfExists::Truncate => {
                tracing::info!("Truncating existing table '{}'", table);
                conn.execute(&format!("DELETE FROM {}", table_sql(table)), [])
                    .with_context(|| format!("Failed to truncate table '{}'", table))?;
                return Ok(());
            }
        }
    }

    let mut definitions = columns
        .iter()
        .map(|c| {
            let mut definition = format!("{} {}", quote_ident(&c.name), declared_type(c.column_type));
            if !c.nullable {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect::<Vec<_>>();
    if let Some(key) = primary_key {
        definitions.push(format!("UNIQUE ({})", quote_ident(key)));
    }

    conn.execute(
        &format!(
            "CREATE TABLE {} ({})",
            table_sql(table),
            definitions.join(", ")
        ),
        [],
    )
    .with_context(|| format!("Failed to create table '{}'", table))?;

    Ok(())
}
