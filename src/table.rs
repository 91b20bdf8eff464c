// ABOUTME: Table references, column definitions and destination load options
// ABOUTME: A Table binds one TableRef to exactly one database handle

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::handle::TableHandle;
use crate::utils::validate_identifier;
use crate::value::Value;

/// Qualified name of a table on one side of a sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Parse `schema.table` or a bare `table`, validating both parts.
    pub fn parse(qualified: &str) -> Result<Self> {
        let qualified = qualified.trim();
        let (schema, name) = match qualified.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, qualified),
        };

        if name.contains('.') {
            bail!(
                "Table name '{}' has more than one '.' separator",
                qualified
            );
        }
        if let Some(schema) = schema {
            validate_identifier(schema)
                .with_context(|| format!("Invalid schema in table name '{}'", qualified))?;
        }
        validate_identifier(name)
            .with_context(|| format!("Invalid table name '{}'", qualified))?;

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Render the reference with a backend-specific identifier quoting function.
    pub fn quoted(&self, quote: fn(&str) -> String) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.name)),
            None => quote(&self.name),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A table reference bound to the one handle that owns it.
///
/// Nothing is cached: every fact is a live query against the handle.
pub struct Table<'h, H: ?Sized> {
    handle: &'h H,
    table: &'h TableRef,
}

impl<'h, H: TableHandle + ?Sized> Table<'h, H> {
    pub fn new(handle: &'h H, table: &'h TableRef) -> Self {
        Self { handle, table }
    }

    pub fn handle(&self) -> &'h H {
        self.handle
    }

    pub fn table_ref(&self) -> &'h TableRef {
        self.table
    }

    pub async fn exists(&self) -> Result<bool> {
        self.handle.table_exists(self.table).await
    }

    pub async fn row_count(&self) -> Result<u64> {
        self.handle.row_count(self.table).await
    }

    pub async fn count_since(&self, column: &str, lower_bound: &Value) -> Result<u64> {
        self.handle.count_since(self.table, column, lower_bound).await
    }

    pub async fn max_value(&self, column: &str) -> Result<Option<Value>> {
        self.handle.max_value(self.table, column).await
    }

    pub async fn is_distinct(&self, column: &str) -> Result<bool> {
        self.handle.is_distinct(self.table, column).await
    }

    pub async fn columns(&self) -> Result<Vec<ColumnDef>> {
        self.handle.columns(self.table).await
    }

    /// Whether the table schema contains `column`.
    pub async fn has_column(&self, column: &str) -> Result<bool> {
        Ok(self.columns().await?.iter().any(|c| c.name == column))
    }
}

impl<H: ?Sized> fmt::Display for Table<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table)
    }
}

/// Canonical column type used when a full copy has to create the destination.
///
/// This is a coarse approximation of each backend's type system, enough to
/// carry the common scalar types across; anything unrecognised becomes `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Bytes,
    Uuid,
}

impl ColumnType {
    /// Map an `information_schema` / declared type name to the canonical type.
    pub fn from_type_name(type_name: &str) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();
        let base = lower
            .split(|c: char| c == '(' || c == ' ')
            .next()
            .unwrap_or("");

        match lower.as_str() {
            "timestamp with time zone" | "timestamptz" => return ColumnType::TimestampTz,
            "timestamp without time zone" => return ColumnType::Timestamp,
            "double precision" => return ColumnType::Double,
            "character varying" | "character" => return ColumnType::Text,
            _ => {}
        }

        match base {
            "bool" | "boolean" => ColumnType::Boolean,
            "smallint" | "int2" | "tinyint" => ColumnType::SmallInt,
            "integer" | "int" | "int4" | "mediumint" => ColumnType::Integer,
            "bigint" | "int8" => ColumnType::BigInt,
            "real" | "float4" | "float" => ColumnType::Real,
            "double" | "float8" => ColumnType::Double,
            "numeric" | "decimal" => ColumnType::Numeric,
            "date" => ColumnType::Date,
            "timestamp" | "datetime" => ColumnType::Timestamp,
            "json" | "jsonb" => ColumnType::Json,
            "bytea" | "blob" | "binary" | "varbinary" | "longblob" | "mediumblob" => {
                ColumnType::Bytes
            }
            "uuid" => ColumnType::Uuid,
            _ => ColumnType::Text,
        }
    }
}

/// A column of a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
        }
    }
}

/// What to do with an existing destination table during a full copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfExists {
    /// Drop and recreate the table.
    #[default]
    Drop,
    /// Keep the table (and any dependent views) and delete its rows.
    Truncate,
}

/// Pass-through options for destination loads.
///
/// The orchestrator never interprets these; backends apply what they support.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub if_exists: IfExists,
    pub distkey: Option<String>,
    pub sortkey: Option<String>,
}
