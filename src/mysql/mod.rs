// ABOUTME: MySQL backend over a mysql_async connection pool
// ABOUTME: Each handle call checks out one pooled connection for its duration

pub mod convert;
pub mod reader;
pub mod writer;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::{Conn, Pool};

use crate::handle::{Backend, DestinationHandle, PageRequest, SourceHandle, TableHandle};
use crate::table::{ColumnDef, LoadOptions, TableRef};
use crate::utils::{quote_mysql_ident, sanitize_url};
use crate::value::{RowSet, Value};

pub(crate) fn table_sql(table: &TableRef) -> String {
    table.quoted(quote_mysql_ident)
}

/// A MySQL database usable as source or destination.
pub struct MySqlDatabase {
    pool: Pool,
    label: String,
}

impl MySqlDatabase {
    /// Build a pool from a `mysql://` URL and check that a connection can be made.
    pub async fn connect(url: &str) -> Result<Self> {
        let label = sanitize_url(url);
        let pool = Pool::from_url(url).with_context(|| format!("Invalid MySQL URL {}", label))?;
        let db = Self { pool, label };
        db.conn().await?;
        tracing::debug!("Connected to MySQL at {}", db.label);
        Ok(db)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .with_context(|| format!("Failed to connect to {}", self.label))
    }

    /// Close every pooled connection.
    pub async fn disconnect(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl TableHandle for MySqlDatabase {
    fn backend(&self) -> Backend {
        Backend::MySQL
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        reader::table_exists(&mut self.conn().await?, table).await
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        reader::get_row_count(&mut self.conn().await?, table).await
    }

    async fn count_since(
        &self,
        table: &TableRef,
        column: &str,
        lower_bound: &Value,
    ) -> Result<u64> {
        reader::count_since(&mut self.conn().await?, table, column, lower_bound).await
    }

    async fn max_value(&self, table: &TableRef, column: &str) -> Result<Option<Value>> {
        reader::max_value(&mut self.conn().await?, table, column).await
    }

    async fn is_distinct(&self, table: &TableRef, column: &str) -> Result<bool> {
        reader::column_is_distinct(&mut self.conn().await?, table, column).await
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>> {
        reader::get_table_columns(&mut self.conn().await?, table).await
    }
}

#[async_trait]
impl SourceHandle for MySqlDatabase {
    async fn fetch_page(&self, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
        reader::read_page(&mut self.conn().await?, table, request).await
    }
}

#[async_trait]
impl DestinationHandle for MySqlDatabase {
    async fn upsert(
        &self,
        rows: &RowSet,
        table: &TableRef,
        primary_key: &str,
        _options: &LoadOptions,
    ) -> Result<u64> {
        writer::write_rows(&mut self.conn().await?, table, rows, Some(primary_key)).await
    }

    async fn append(&self, rows: &RowSet, table: &TableRef) -> Result<u64> {
        writer::write_rows(&mut self.conn().await?, table, rows, None).await
    }

    async fn replace_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
        options: &LoadOptions,
    ) -> Result<()> {
        writer::replace_table(
            &mut self.conn().await?,
            table,
            columns,
            primary_key,
            options.if_exists,
        )
        .await
    }
}
