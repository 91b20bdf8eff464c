// ABOUTME: PostgreSQL and Redshift backend over tokio-postgres with native TLS
// ABOUTME: One client per handle; Redshift differs only in upsert strategy and DDL

pub mod convert;
pub mod reader;
pub mod writer;

use anyhow::{Context, Result};
use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::Client;

use crate::handle::{Backend, DestinationHandle, PageRequest, SourceHandle, TableHandle};
use crate::table::{ColumnDef, LoadOptions, TableRef};
use crate::utils::{quote_ident, retry_with_backoff, sanitize_url};
use crate::value::{RowSet, Value};
use writer::TableWriter;

/// SQL dialect spoken by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Postgres,
    Redshift,
}

pub(crate) fn table_sql(table: &TableRef) -> String {
    table.quoted(quote_ident)
}

/// Open a connection with TLS negotiated per the URL's `sslmode`.
///
/// `allow_self_signed_certs` disables certificate and hostname verification
/// and is meant for testing only.
pub async fn connect(url: &str, allow_self_signed_certs: bool) -> Result<Client> {
    let mut builder = TlsConnector::builder();
    if allow_self_signed_certs {
        tracing::warn!("TLS certificate verification is disabled");
        builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    let connector = builder.build().context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    let label = sanitize_url(url);
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection to {} closed with error: {}", label, e);
        }
    });

    Ok(client)
}

/// Connect with the same exponential backoff used for page operations.
pub async fn connect_with_retry(
    url: &str,
    allow_self_signed_certs: bool,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<Client> {
    retry_with_backoff(
        || connect(url, allow_self_signed_certs),
        max_retries,
        initial_delay,
    )
    .await
}

/// A PostgreSQL or Redshift database usable as source or destination.
pub struct PostgresDatabase {
    client: Client,
    flavor: Flavor,
}

impl PostgresDatabase {
    pub fn new(client: Client, flavor: Flavor) -> Self {
        Self { client, flavor }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    fn writer(&self) -> TableWriter<'_> {
        TableWriter::new(&self.client, self.flavor)
    }
}

#[async_trait]
impl TableHandle for PostgresDatabase {
    fn backend(&self) -> Backend {
        match self.flavor {
            Flavor::Postgres => Backend::PostgreSQL,
            Flavor::Redshift => Backend::Redshift,
        }
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        reader::table_exists(&self.client, table).await
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        reader::get_row_count(&self.client, table).await
    }

    async fn count_since(
        &self,
        table: &TableRef,
        column: &str,
        lower_bound: &Value,
    ) -> Result<u64> {
        reader::count_since(&self.client, table, column, lower_bound).await
    }

    async fn max_value(&self, table: &TableRef, column: &str) -> Result<Option<Value>> {
        reader::max_value(&self.client, table, column).await
    }

    async fn is_distinct(&self, table: &TableRef, column: &str) -> Result<bool> {
        reader::column_is_distinct(&self.client, table, column).await
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>> {
        reader::get_table_columns(&self.client, table).await
    }
}

#[async_trait]
impl SourceHandle for PostgresDatabase {
    async fn fetch_page(&self, table: &TableRef, request: &PageRequest) -> Result<RowSet> {
        reader::read_page(&self.client, table, request).await
    }
}

#[async_trait]
impl DestinationHandle for PostgresDatabase {
    async fn upsert(
        &self,
        rows: &RowSet,
        table: &TableRef,
        primary_key: &str,
        _options: &LoadOptions,
    ) -> Result<u64> {
        self.writer().upsert(table, rows, primary_key).await
    }

    async fn append(&self, rows: &RowSet, table: &TableRef) -> Result<u64> {
        self.writer().append(table, rows).await
    }

    async fn replace_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
        options: &LoadOptions,
    ) -> Result<()> {
        self.writer()
            .replace_table(table, columns, primary_key, options)
            .await
    }
}
