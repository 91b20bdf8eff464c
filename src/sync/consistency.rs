// ABOUTME: Consistency checks around a sync run
// ABOUTME: Key distinctness before copying, advisory row-count reconciliation after

use serde::Serialize;

use crate::error::{SyncError, SyncResult};
use crate::handle::TableHandle;
use crate::table::Table;

/// Fail with [`SyncError::DuplicateKey`] unless `primary_key` is distinct on `table`.
///
/// Runs before anything is copied, so a rejected run leaves the destination untouched.
pub async fn ensure_distinct<H>(table: &Table<'_, H>, primary_key: &str) -> SyncResult<()>
where
    H: TableHandle + ?Sized,
{
    if !table.has_column(primary_key).await? {
        return Err(SyncError::ColumnNotFound {
            table: table.to_string(),
            column: primary_key.to_string(),
        });
    }

    if table.is_distinct(primary_key).await? {
        Ok(())
    } else {
        Err(SyncError::DuplicateKey {
            table: table.to_string(),
            column: primary_key.to_string(),
        })
    }
}

/// Result of the post-run row-count comparison.
///
/// Advisory only: concurrent writes to the source during a run make exact
/// equality unreliable, so a mismatch is logged and never fails the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reconciliation {
    Matched { rows: u64 },
    Mismatch { source_rows: u64, destination_rows: u64 },
    /// The counts could not be read.
    Unavailable { reason: String },
}

impl Reconciliation {
    pub fn is_matched(&self) -> bool {
        matches!(self, Reconciliation::Matched { .. })
    }
}

/// Compare source and destination row counts after a run.
pub async fn verify_counts<S, D>(source: &Table<'_, S>, destination: &Table<'_, D>) -> Reconciliation
where
    S: TableHandle + ?Sized,
    D: TableHandle + ?Sized,
{
    let counts = async {
        let source_rows = source.row_count().await?;
        let destination_rows = destination.row_count().await?;
        anyhow::Ok((source_rows, destination_rows))
    }
    .await;

    match counts {
        Ok((source_rows, destination_rows)) if source_rows == destination_rows => {
            tracing::debug!(
                "Row counts match for {} -> {}: {}",
                source,
                destination,
                source_rows
            );
            Reconciliation::Matched { rows: source_rows }
        }
        Ok((source_rows, destination_rows)) => {
            tracing::warn!(
                "Row count mismatch after sync {} -> {}: source={}, destination={}",
                source,
                destination,
                source_rows,
                destination_rows
            );
            Reconciliation::Mismatch {
                source_rows,
                destination_rows,
            }
        }
        Err(e) => {
            tracing::warn!(
                "Could not verify row counts for {} -> {}: {:#}",
                source,
                destination,
                e
            );
            Reconciliation::Unavailable {
                reason: format!("{:#}", e),
            }
        }
    }
}
