// ABOUTME: Capability traits every database backend implements
// ABOUTME: The sync engine only ever talks to databases through these traits

use anyhow::Result;
use async_trait::async_trait;

use crate::table::{ColumnDef, LoadOptions, TableRef};
use crate::value::{RowSet, Value};

/// Kind of database behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    PostgreSQL,
    Redshift,
    MySQL,
    SQLite,
    Memory,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::PostgreSQL => "postgres",
            Backend::Redshift => "redshift",
            Backend::MySQL => "mysql",
            Backend::SQLite => "sqlite",
            Backend::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// One page of a watermark-filtered scan.
///
/// Backends must order rows by `watermark_column` then each tie breaker in
/// turn so that OFFSET pagination is deterministic across requests, and must
/// bind `lower_bound` as a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub watermark_column: String,
    /// Secondary sort keys: the primary key, or every remaining column when
    /// no unique key is known.
    pub tie_breakers: Vec<String>,
    /// Inclusive lower bound on the watermark; `None` scans from the start.
    pub lower_bound: Option<Value>,
    pub offset: u64,
    pub limit: u64,
}

/// Read-only facts about tables on one database.
#[async_trait]
pub trait TableHandle: Send + Sync {
    fn backend(&self) -> Backend;

    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    async fn row_count(&self, table: &TableRef) -> Result<u64>;

    /// Count rows whose `column` is greater than or equal to `lower_bound`.
    async fn count_since(&self, table: &TableRef, column: &str, lower_bound: &Value)
        -> Result<u64>;

    /// Maximum value of `column`, or `None` when the table has no rows.
    async fn max_value(&self, table: &TableRef, column: &str) -> Result<Option<Value>>;

    /// Whether every row has a different value in `column`.
    async fn is_distinct(&self, table: &TableRef, column: &str) -> Result<bool>;

    /// Column definitions in ordinal order. Empty when the table does not exist.
    async fn columns(&self, table: &TableRef) -> Result<Vec<ColumnDef>>;
}

/// A database rows are copied from.
#[async_trait]
pub trait SourceHandle: TableHandle {
    async fn fetch_page(&self, table: &TableRef, request: &PageRequest) -> Result<RowSet>;
}

/// A database rows are copied into.
#[async_trait]
pub trait DestinationHandle: TableHandle {
    /// Insert or update `rows` keyed by `primary_key`. Returns rows written.
    async fn upsert(
        &self,
        rows: &RowSet,
        table: &TableRef,
        primary_key: &str,
        options: &LoadOptions,
    ) -> Result<u64>;

    /// Plain insert of `rows`, used to fill a freshly replaced table.
    async fn append(&self, rows: &RowSet, table: &TableRef) -> Result<u64>;

    /// Drop or truncate `table` per `options.if_exists`, then make sure it
    /// exists with `columns`. `primary_key`, when given, gets a unique constraint.
    async fn replace_table(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        primary_key: Option<&str>,
        options: &LoadOptions,
    ) -> Result<()>;
}

/// A handle usable on either side, so a run can reverse its direction.
pub trait DatabaseHandle: SourceHandle + DestinationHandle {}

impl<T: SourceHandle + DestinationHandle + ?Sized> DatabaseHandle for T {}
