// ABOUTME: Error taxonomy for a single table synchronization run
// ABOUTME: Fatal errors abort one sync specification, never its siblings

use thiserror::Error;

/// Errors that terminate the sync of one table specification.
///
/// Collaborator failures (queries, upserts, connection drops) are wrapped in
/// [`SyncError::TransientIo`] with their full `anyhow` context chain. Row-count
/// disagreement after a run is not an error; see
/// [`crate::sync::consistency::Reconciliation`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or missing field in a sync specification.
    #[error("invalid sync specification: {0}")]
    Configuration(String),

    /// The source primary key is not distinct, so an upsert keyed on it is ambiguous.
    #[error("primary key {column} is not distinct in source table {table}")]
    DuplicateKey { table: String, column: String },

    /// The destination watermark is later than the source watermark.
    #[error(
        "destination table {destination} is ahead of source {source_table} \
         ({column}: destination={destination_cursor}, source={source_cursor})"
    )]
    DestinationAhead {
        source_table: String,
        destination: String,
        column: String,
        source_cursor: String,
        destination_cursor: String,
    },

    /// A watermark or key column does not exist on the table.
    #[error("column {column} not found on table {table}")]
    ColumnNotFound { table: String, column: String },

    /// The two watermark values cannot be ordered against each other.
    #[error("cannot compare watermark {column}: source={source_cursor}, destination={destination_cursor}")]
    IncomparableWatermarks {
        column: String,
        source_cursor: String,
        destination_cursor: String,
    },

    /// Failure reported by a database handle.
    #[error("database operation failed: {0:#}")]
    TransientIo(#[from] anyhow::Error),
}

impl SyncError {
    /// Short machine-friendly label used in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Configuration(_) => "configuration",
            SyncError::DuplicateKey { .. } => "duplicate_key",
            SyncError::DestinationAhead { .. } => "destination_ahead",
            SyncError::ColumnNotFound { .. } => "column_not_found",
            SyncError::IncomparableWatermarks { .. } => "incomparable_watermarks",
            SyncError::TransientIo(_) => "transient_io",
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
