// ABOUTME: TOML run configuration - connections, retry policy and table specs
// ABOUTME: Each [[tables]] entry validates on its own; a bad entry never sinks its siblings

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::sync::{FullRefreshSpec, SyncSpec, TableSpec};
use crate::table::{IfExists, LoadOptions, TableRef};
use crate::utils::{sanitize_url, validate_identifier};

/// Which configured connection plays the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// `[source]` is read, `[destination]` is written.
    #[default]
    Forward,
    /// The connections swap roles; table names stay as configured.
    Reverse,
}

/// Database engine behind a connection section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Redshift,
    Mysql,
    Sqlite,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Redshift => "redshift",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// A resolved connection: the URL has already been read from `url_env` if needed.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub kind: DatabaseKind,
    pub url: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("kind", &self.kind)
            .field("url", &sanitize_url(&self.url))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnection {
    kind: DatabaseKind,
    url: Option<String>,
    url_env: Option<String>,
}

impl RawConnection {
    fn resolve(self, section: &str) -> Result<ConnectionConfig> {
        let url = match (self.url, self.url_env) {
            (Some(url), None) => url,
            (None, Some(var)) => std::env::var(&var).with_context(|| {
                format!(
                    "[{}] url_env names environment variable {} which is not set",
                    section, var
                )
            })?,
            (Some(_), Some(_)) => bail!("[{}] sets both url and url_env", section),
            (None, None) => bail!("[{}] needs either url or url_env", section),
        };
        if url.trim().is_empty() {
            bail!("[{}] connection URL is empty", section);
        }
        Ok(ConnectionConfig {
            kind: self.kind,
            url,
        })
    }
}

/// Bounded retry around page fetches and upserts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// One `[[tables]]` entry as written in the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTableSpec {
    #[serde(rename = "type")]
    sync_type: String,
    source: String,
    destination: String,
    primary_key: Option<String>,
    watermark_column: Option<String>,
    #[serde(default = "default_distinct_check")]
    distinct_check: bool,
    chunk_size: Option<u64>,
    #[serde(default)]
    if_exists: IfExists,
    distkey: Option<String>,
    sortkey: Option<String>,
}

fn default_distinct_check() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRunConfig {
    #[serde(default)]
    direction: Direction,
    chunk_size: Option<u64>,
    source: RawConnection,
    destination: RawConnection,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(default)]
    tables: Vec<toml::Value>,
}

/// A `[[tables]]` entry after validation.
#[derive(Debug)]
pub struct ConfiguredTable {
    /// `source -> destination` as written, or the entry position when unreadable.
    pub label: String,
    pub spec: SyncResult<TableSpec>,
}

impl ConfiguredTable {
    /// Whether `name` selects this entry (matches its source or destination table).
    pub fn matches(&self, name: &str) -> bool {
        match &self.spec {
            Ok(spec) => {
                spec.source().to_string() == name || spec.destination().to_string() == name
            }
            Err(_) => self.label.split(" -> ").any(|part| part == name),
        }
    }
}

/// A loaded run configuration. Connections are already oriented by `direction`.
#[derive(Debug)]
pub struct RunConfig {
    pub direction: Direction,
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    pub retry: RetryPolicy,
    pub tables: Vec<ConfiguredTable>,
}

impl RunConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse a configuration from TOML text.
    ///
    /// Connection and retry sections are fatal on error. Table entries are
    /// not: each becomes a [`ConfiguredTable`] holding either its spec or its
    /// own configuration error.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw: RawRunConfig = toml::from_str(contents).context("Failed to parse TOML")?;

        if raw.chunk_size == Some(0) {
            bail!("chunk_size must be at least 1");
        }

        let source = raw.source.resolve("source")?;
        let destination = raw.destination.resolve("destination")?;
        let (source, destination) = match raw.direction {
            Direction::Forward => (source, destination),
            Direction::Reverse => (destination, source),
        };

        let tables = raw
            .tables
            .into_iter()
            .enumerate()
            .map(|(index, entry)| parse_table_entry(index, entry, raw.chunk_size))
            .collect();

        Ok(Self {
            direction: raw.direction,
            source,
            destination,
            retry: raw.retry,
            tables,
        })
    }

    /// Entries selected by `names`; all entries when `names` is empty.
    pub fn select<'a>(&'a self, names: &[String]) -> Vec<&'a ConfiguredTable> {
        self.tables
            .iter()
            .filter(|t| names.is_empty() || names.iter().any(|n| t.matches(n)))
            .collect()
    }
}

fn parse_table_entry(
    index: usize,
    entry: toml::Value,
    default_chunk_size: Option<u64>,
) -> ConfiguredTable {
    let label = match (
        entry.get("source").and_then(|v| v.as_str()),
        entry.get("destination").and_then(|v| v.as_str()),
    ) {
        (Some(source), Some(destination)) => format!("{} -> {}", source, destination),
        (Some(source), None) => source.to_string(),
        _ => format!("tables[{}]", index),
    };

    let spec = entry
        .try_into::<RawTableSpec>()
        .map_err(|e| SyncError::Configuration(format!("{}: {}", label, e)))
        .and_then(|raw| build_table_spec(raw, default_chunk_size))
        .map_err(|e| match e {
            SyncError::Configuration(message) if !message.starts_with(&label) => {
                SyncError::Configuration(format!("{}: {}", label, message))
            }
            other => other,
        });

    ConfiguredTable { label, spec }
}

fn build_table_spec(raw: RawTableSpec, default_chunk_size: Option<u64>) -> SyncResult<TableSpec> {
    let source = table_ref(&raw.source, "source")?;
    let destination = table_ref(&raw.destination, "destination")?;

    let chunk_size = raw.chunk_size.or(default_chunk_size);
    if chunk_size == Some(0) {
        return Err(SyncError::Configuration(
            "chunk_size must be at least 1".to_string(),
        ));
    }

    let distkey = optional_identifier(raw.distkey, "distkey")?;
    let sortkey = optional_identifier(raw.sortkey, "sortkey")?;
    let explicit_key = optional_identifier(raw.primary_key, "primary_key")?;
    let watermark_column =
        optional_identifier(raw.watermark_column, "watermark_column")?.or(sortkey.clone());

    let load_options = LoadOptions {
        if_exists: raw.if_exists,
        distkey,
        sortkey,
    };

    match raw.sync_type.as_str() {
        "incremental" => {
            // The distribution key stands in for the upsert key only here
            let primary_key = explicit_key.or(load_options.distkey.clone()).ok_or_else(|| {
                SyncError::Configuration(
                    "incremental sync needs primary_key (or distkey)".to_string(),
                )
            })?;
            let watermark_column = watermark_column.ok_or_else(|| {
                SyncError::Configuration(
                    "incremental sync needs watermark_column (or sortkey)".to_string(),
                )
            })?;
            Ok(TableSpec::Incremental(SyncSpec {
                source,
                destination,
                primary_key,
                watermark_column,
                chunk_size,
                distinct_check: raw.distinct_check,
                load_options,
            }))
        }
        "full_refresh" => Ok(TableSpec::FullRefresh(FullRefreshSpec {
            source,
            destination,
            primary_key: explicit_key,
            chunk_size,
            load_options,
        })),
        other => Err(SyncError::Configuration(format!(
            "unknown sync type '{}', expected incremental or full_refresh",
            other
        ))),
    }
}

fn table_ref(name: &str, field: &str) -> SyncResult<TableRef> {
    TableRef::parse(name).map_err(|e| SyncError::Configuration(format!("{}: {:#}", field, e)))
}

fn optional_identifier(value: Option<String>, field: &str) -> SyncResult<Option<String>> {
    match value {
        Some(value) => {
            let value = value.trim().to_string();
            validate_identifier(&value)
                .map_err(|e| SyncError::Configuration(format!("{}: {:#}", field, e)))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}
