// ABOUTME: Watermark-based incremental table sync and its full-copy fallback
// ABOUTME: Exposes the sync specifications, outcomes and the engine that runs them

pub mod consistency;
pub mod cursor;
pub mod engine;
pub mod extract;
pub mod full;

pub use consistency::Reconciliation;
pub use engine::IncrementalSyncEngine;
pub use extract::ChunkedExtractor;

use crate::table::{LoadOptions, TableRef};

/// Immutable configuration of one incremental sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSpec {
    pub source: TableRef,
    pub destination: TableRef,
    pub primary_key: String,
    /// Monotonically non-decreasing column used as the cursor. May equal the primary key.
    pub watermark_column: String,
    /// Rows per page. `None` lets the extractor use its own page cap.
    pub chunk_size: Option<u64>,
    pub distinct_check: bool,
    pub load_options: LoadOptions,
}

impl SyncSpec {
    /// The full copy run when the destination has no baseline yet.
    pub fn to_full_refresh(&self) -> FullRefreshSpec {
        FullRefreshSpec {
            source: self.source.clone(),
            destination: self.destination.clone(),
            primary_key: Some(self.primary_key.clone()),
            chunk_size: self.chunk_size,
            load_options: self.load_options.clone(),
        }
    }
}

/// Configuration of an unconditional replace-all copy.
#[derive(Debug, Clone, PartialEq)]
pub struct FullRefreshSpec {
    pub source: TableRef,
    pub destination: TableRef,
    /// Made the destination's unique key, and the copy order, when the source
    /// column turns out to be distinct.
    pub primary_key: Option<String>,
    pub chunk_size: Option<u64>,
    pub load_options: LoadOptions,
}

/// One configured table, in either sync mode.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSpec {
    Incremental(SyncSpec),
    FullRefresh(FullRefreshSpec),
}

impl TableSpec {
    pub fn source(&self) -> &TableRef {
        match self {
            TableSpec::Incremental(spec) => &spec.source,
            TableSpec::FullRefresh(spec) => &spec.source,
        }
    }

    pub fn destination(&self) -> &TableRef {
        match self {
            TableSpec::Incremental(spec) => &spec.destination,
            TableSpec::FullRefresh(spec) => &spec.destination,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            TableSpec::Incremental(_) => "incremental",
            TableSpec::FullRefresh(_) => "full_refresh",
        }
    }
}

/// Successful result of one sync run. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The source table had no rows; nothing was touched.
    NoOpEmptySource,
    /// Source and destination watermarks were equal.
    NoOpAlreadyInSync,
    /// New rows were paged across and upserted.
    Completed {
        rows_copied: u64,
        reconciliation: Reconciliation,
    },
    /// The destination was replaced by a full copy of the source.
    FullCopy {
        rows_copied: u64,
        reconciliation: Reconciliation,
    },
}

impl SyncOutcome {
    pub fn rows_copied(&self) -> u64 {
        match self {
            SyncOutcome::Completed { rows_copied, .. } | SyncOutcome::FullCopy { rows_copied, .. } => {
                *rows_copied
            }
            _ => 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            SyncOutcome::NoOpEmptySource | SyncOutcome::NoOpAlreadyInSync
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::NoOpEmptySource => "no-op (empty source)",
            SyncOutcome::NoOpAlreadyInSync => "no-op (already in sync)",
            SyncOutcome::Completed { .. } => "completed",
            SyncOutcome::FullCopy { .. } => "full copy",
        }
    }
}
