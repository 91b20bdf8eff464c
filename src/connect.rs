// ABOUTME: Opens a database handle for a configured connection section
// ABOUTME: Dispatches on the connection kind to the matching backend

use anyhow::{Context, Result};

use crate::config::{ConnectionConfig, DatabaseKind, RetryPolicy};
use crate::handle::DatabaseHandle;
use crate::mysql::MySqlDatabase;
use crate::postgres::{connect_with_retry, Flavor, PostgresDatabase};
use crate::sqlite::SqliteDatabase;
use crate::utils::sanitize_url;

/// Open `config` as a handle usable on either side of a sync.
///
/// PostgreSQL and Redshift connections are retried with `retry`.
pub async fn open_handle(
    config: &ConnectionConfig,
    allow_self_signed_certs: bool,
    retry: &RetryPolicy,
) -> Result<Box<dyn DatabaseHandle>> {
    tracing::info!("Connecting to {} at {}", config.kind, sanitize_url(&config.url));

    let handle: Box<dyn DatabaseHandle> = match config.kind {
        DatabaseKind::Postgres | DatabaseKind::Redshift => {
            let flavor = if config.kind == DatabaseKind::Redshift {
                Flavor::Redshift
            } else {
                Flavor::Postgres
            };
            let client = connect_with_retry(
                &config.url,
                allow_self_signed_certs,
                retry.max_retries,
                retry.initial_delay(),
            )
            .await?;
            Box::new(PostgresDatabase::new(client, flavor))
        }
        DatabaseKind::Mysql => Box::new(MySqlDatabase::connect(&config.url).await?),
        DatabaseKind::Sqlite => Box::new(
            SqliteDatabase::open(&config.url)
                .with_context(|| format!("Failed to open {}", config.url))?,
        ),
    };

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Backend;

    #[tokio::test]
    async fn test_open_sqlite_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        let config = ConnectionConfig {
            kind: DatabaseKind::Sqlite,
            url: path.to_string_lossy().to_string(),
        };

        let handle = open_handle(&config, false, &RetryPolicy::disabled())
            .await
            .unwrap();
        assert_eq!(handle.backend(), Backend::SQLite);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_open_invalid_mysql_url_fails() {
        let config = ConnectionConfig {
            kind: DatabaseKind::Mysql,
            url: "not a url".to_string(),
        };
        assert!(open_handle(&config, false, &RetryPolicy::disabled())
            .await
            .is_err());
    }
}
