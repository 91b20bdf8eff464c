// ABOUTME: PostgreSQL/Redshift writes - batched upserts, appends and table replacement
// ABOUTME: PostgreSQL upserts with ON CONFLICT; Redshift deletes matching keys then inserts

use anyhow::{bail, Context, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::convert::to_sql_params;
use super::{table_sql, Flavor};
use crate::table::{ColumnDef, ColumnType, IfExists, LoadOptions, TableRef};
use crate::utils::quote_ident;
use crate::value::{RowSet, Value};

/// Writes batches to a PostgreSQL or Redshift table.
pub struct TableWriter<'a> {
    client: &'a Client,
    flavor: Flavor,
}

impl<'a> TableWriter<'a> {
    pub fn new(client: &'a Client, flavor: Flavor) -> Self {
        Self { client, flavor }
    }

    /// Insert or update `rows` keyed by `primary_key`. Returns the number of rows written.
    pub async fn upsert(&self, table: &TableRef, rows: &RowSet, primary_key: &str) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let key_idx = match rows.column_index(primary_key) {
            Some(idx) => idx,
            None => bail!(
                "Primary key column {} is missing from the rows for {}",
                primary_key,
                table
            ),
        };

        let deduped = last_row_per_key(&rows.rows, key_idx);
        if deduped.len() < rows.len() {
            tracing::debug!(
                "Collapsed {} rows with repeated {} values before upserting into {}",
                rows.len() - deduped.len(),
                primary_key,
                table
            );
        }

        let mut total = 0u64;
        for chunk in deduped.chunks(rows_per_statement(self.flavor, rows.columns.len())) {
            total += match self.flavor {
                Flavor::Postgres => {
                    let query = build_upsert_query(table, primary_key, &rows.columns, chunk.len());
                    self.execute_rows(&query, chunk)
                        .await
                        .with_context(|| format!("Failed to upsert batch into {}", table))?
                }
                Flavor::Redshift => self
                    .delete_then_insert(table, primary_key, key_idx, &rows.columns, chunk)
                    .await
                    .with_context(|| format!("Failed to upsert batch into {}", table))?,
            };
        }
        Ok(total)
    }

    /// Plain multi-row insert.
    pub async fn append(&self, table: &TableRef, rows: &RowSet) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut total = 0u64;
        for chunk in rows.rows.chunks(rows_per_statement(self.flavor, rows.columns.len())) {
            let query = build_insert_query(table, &rows.columns, chunk.len());
            total += self
                .execute_rows(&query, chunk)
                .await
                .with_context(|| format!("Failed to insert batch into {}", table))?;
        }
        Ok(total)
    }

    /// Prepare `query`, convert `rows` to its parameter types and execute it.
    async fn execute_rows(&self, query: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let stmt = self.client.prepare(query).await?;
        let flattened: Vec<Value> = rows.iter().flatten().cloned().collect();
        let params = to_sql_params(&flattened, stmt.params())?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(self.client.execute(&stmt, &refs).await?)
    }

    /// Redshift has no ON CONFLICT: delete the incoming keys and insert, atomically.
    async fn delete_then_insert(
        &self,
        table: &TableRef,
        primary_key: &str,
        key_idx: usize,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        let keys: Vec<Vec<Value>> = rows.iter().map(|row| vec![row[key_idx].clone()]).collect();
        let delete = build_delete_query(table, primary_key, keys.len());
        let insert = build_insert_query(table, columns, rows.len());

        self.client.batch_execute("BEGIN").await?;
        let result = async {
            self.execute_rows(&delete, &keys).await?;
            self.execute_rows(&insert, rows).await
        }
        .await;

        match result {
            Ok(inserted) => {
                self.client.batch_execute("COMMIT").await?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback) = self.client.batch_execute("ROLLBACK").await {
                    tracing::warn!("Failed to roll back upsert into {}: {}", table, rollback);
                }
                Err(e)
            }
        }
    }

    /// Drop or truncate `table` per `options.if_exists`, then create it if missing.
    pub async fn replace_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
        options: &LoadOptions,
    ) -> Result<()> {
        let exists = super::reader::table_exists(self.client, table).await?;
        if exists {
            match options.if_exists {
                IfExists::Drop => {
                    tracing::info!("Dropping existing table {}", table);
                    self.client
                        .batch_execute(&format!("DROP TABLE {}", table_sql(table)))
                        .await
                        .with_context(|| format!("Failed to drop table {}", table))?;
                }
                IfExists::Truncate => {
                    tracing::info!("Truncating existing table {}", table);
                    self.client
                        .batch_execute(&format!("TRUNCATE {}", table_sql(table)))
                        .await
                        .with_context(|| format!("Failed to truncate table {}", table))?;
                    return Ok(());
                }
            }
        }

        let ddl = build_create_table(table, columns, primary_key, options, self.flavor);
        tracing::debug!("Creating table: {}", ddl);
        self.client
            .batch_execute(&ddl)
            .await
            .with_context(|| format!("Failed to create table {}", table))?;
        Ok(())
    }
}

/// Rows per statement so the bind parameter count stays under the protocol limit.
fn rows_per_statement(flavor: Flavor, columns: usize) -> usize {
    let max_params = match flavor {
        Flavor::Postgres => 65_000,
        Flavor::Redshift => 32_000,
    };
    std::cmp::max(1, max_params / columns.max(1))
}

fn placeholders(num_rows: usize, num_cols: usize) -> String {
    (0..num_rows)
        .map(|row_idx| {
            let row: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", row.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a multi-row INSERT.
pub fn build_insert_query(table: &TableRef, columns: &[String], num_rows: usize) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table_sql(table),
        column_list(columns),
        placeholders(num_rows, columns.len())
    )
}

/// Build a multi-row upsert.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("id", "name")
/// VALUES ($1, $2), ($3, $4)
/// ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name"
/// ```
pub fn build_upsert_query(
    table: &TableRef,
    primary_key: &str,
    columns: &[String],
    num_rows: usize,
) -> String {
    let update_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != primary_key)
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
        .collect();

    let update_clause = if update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "{} ON CONFLICT ({}) {}",
        build_insert_query(table, columns, num_rows),
        quote_ident(primary_key),
        update_clause
    )
}

/// Build `DELETE .. WHERE key IN ($1, ..)`.
pub fn build_delete_query(table: &TableRef, primary_key: &str, num_keys: usize) -> String {
    let keys: Vec<String> = (1..=num_keys).map(|i| format!("${}", i)).collect();
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        table_sql(table),
        quote_ident(primary_key),
        keys.join(", ")
    )
}

fn column_type_sql(column_type: ColumnType, flavor: Flavor) -> &'static str {
    match (column_type, flavor) {
        (ColumnType::Boolean, _) => "BOOLEAN",
        (ColumnType::SmallInt, _) => "SMALLINT",
        (ColumnType::Integer, _) => "INTEGER",
        (ColumnType::BigInt, _) => "BIGINT",
        (ColumnType::Real, _) => "REAL",
        (ColumnType::Double, _) => "DOUBLE PRECISION",
        (ColumnType::Date, _) => "DATE",
        (ColumnType::Timestamp, _) => "TIMESTAMP",
        (ColumnType::TimestampTz, _) => "TIMESTAMPTZ",
        (ColumnType::Numeric, Flavor::Postgres) => "NUMERIC",
        (ColumnType::Text, Flavor::Postgres) => "TEXT",
        (ColumnType::Json, Flavor::Postgres) => "JSONB",
        (ColumnType::Bytes, Flavor::Postgres) => "BYTEA",
        (ColumnType::Uuid, Flavor::Postgres) => "UUID",
        // Redshift defaults NUMERIC to (18,0) and TEXT to VARCHAR(256)
        (ColumnType::Numeric, Flavor::Redshift) => "NUMERIC(38,10)",
        (ColumnType::Text | ColumnType::Json, Flavor::Redshift) => "VARCHAR(65535)",
        (ColumnType::Bytes, Flavor::Redshift) => "VARBYTE",
        (ColumnType::Uuid, Flavor::Redshift) => "VARCHAR(36)",
    }
}

/// Build the CREATE TABLE for a full copy. Only Redshift gets DISTKEY/SORTKEY.
pub fn build_create_table(
    table: &TableRef,
    columns: &[ColumnDef],
    primary_key: Option<&str>,
    options: &LoadOptions,
    flavor: Flavor,
) -> String {
    let mut definitions: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut definition = format!(
                "{} {}",
                quote_ident(&c.name),
                column_type_sql(c.column_type, flavor)
            );
            if !c.nullable {
                definition.push_str(" NOT NULL");
            }
            definition
        })
        .collect();
    if let Some(key) = primary_key {
        definitions.push(format!("UNIQUE ({})", quote_ident(key)));
    }

    let mut ddl = format!("CREATE TABLE {} ({})", table_sql(table), definitions.join(", "));
    if flavor == Flavor::Redshift {
        if let Some(distkey) = &options.distkey {
            ddl.push_str(&format!(" DISTKEY({})", quote_ident(distkey)));
        }
        if let Some(sortkey) = &options.sortkey {
            ddl.push_str(&format!(" SORTKEY({})", quote_ident(sortkey)));
        }
    }
    ddl
}

/// Keep only the last row for each key value, at the position the key was
/// first seen. One ON CONFLICT statement cannot update the same row twice.
/// NULL keys never conflict and are all kept.
fn last_row_per_key(rows: &[Vec<Value>], key_idx: usize) -> Vec<Vec<Value>> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    let mut deduped: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = &row[key_idx];
        if key.is_null() {
            deduped.push(row.clone());
            continue;
        }
        match positions.entry(format!("{:?}", key)) {
            Entry::Occupied(slot) => deduped[*slot.get()] = row.clone(),
            Entry::Vacant(slot) => {
                slot.insert(deduped.len());
                deduped.push(row.clone());
            }
        }
    }
    deduped
}
