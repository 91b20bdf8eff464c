// ABOUTME: SyncRunner - runs every configured table spec in order, independently
// ABOUTME: Per-spec failures are captured in the RunSummary instead of aborting the batch

use serde::Serialize;
use std::time::Instant;

use crate::config::{ConfiguredTable, RetryPolicy};
use crate::error::SyncError;
use crate::handle::{DestinationHandle, SourceHandle};
use crate::sync::{IncrementalSyncEngine, SyncOutcome};

/// What happened to one configured table.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpecStatus {
    Completed {
        outcome: String,
        rows_copied: u64,
        counts_matched: bool,
    },
    NoOp {
        reason: String,
    },
    Failed {
        kind: String,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SpecReport {
    pub table: String,
    pub mode: String,
    #[serde(flatten)]
    pub status: SpecStatus,
    pub duration_ms: u64,
}

impl SpecReport {
    fn from_result(
        table: String,
        mode: &str,
        result: Result<SyncOutcome, SyncError>,
        duration_ms: u64,
    ) -> Self {
        let status = match result {
            Ok(outcome) if outcome.is_noop() => SpecStatus::NoOp {
                reason: outcome.label().to_string(),
            },
            Ok(outcome) => {
                let counts_matched = match &outcome {
                    SyncOutcome::Completed { reconciliation, .. }
                    | SyncOutcome::FullCopy { reconciliation, .. } => reconciliation.is_matched(),
                    _ => true,
                };
                SpecStatus::Completed {
                    outcome: outcome.label().to_string(),
                    rows_copied: outcome.rows_copied(),
                    counts_matched,
                }
            }
            Err(e) => SpecStatus::Failed {
                kind: e.kind().to_string(),
                error: e.to_string(),
            },
        };
        Self {
            table,
            mode: mode.to_string(),
            status,
            duration_ms,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, SpecStatus::Failed { .. })
    }
}

/// Statistics from one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub noop: usize,
    pub failed: usize,
    pub rows_copied: u64,
    pub duration_ms: u64,
    pub reports: Vec<SpecReport>,
}

impl RunSummary {
    /// Check if every spec finished without error.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, report: SpecReport) {
        match &report.status {
            SpecStatus::Completed { rows_copied, .. } => {
                self.completed += 1;
                self.rows_copied += rows_copied;
            }
            SpecStatus::NoOp { .. } => self.noop += 1,
            SpecStatus::Failed { .. } => self.failed += 1,
        }
        self.reports.push(report);
    }
}

/// Runs a batch of table specs between one source and one destination.
///
/// Specs share nothing but the two handles, so each one succeeds or fails
/// on its own.
pub struct SyncRunner<'a, S: ?Sized, D: ?Sized> {
    engine: IncrementalSyncEngine<'a, S, D>,
}

impl<'a, S, D> SyncRunner<'a, S, D>
where
    S: SourceHandle + ?Sized,
    D: DestinationHandle + ?Sized,
{
    pub fn new(source: &'a S, destination: &'a D, retry: RetryPolicy) -> Self {
        Self {
            engine: IncrementalSyncEngine::new(source, destination).with_retry(retry),
        }
    }

    /// Run every entry in order. Entries whose configuration failed to
    /// validate are reported as failed without touching either database.
    pub async fn run(&self, tables: &[&ConfiguredTable]) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        for table in tables {
            let report = self.run_one(table).await;
            summary.record(report);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Sync run finished: {} completed, {} no-op, {} failed, {} rows copied in {}ms",
            summary.completed,
            summary.noop,
            summary.failed,
            summary.rows_copied,
            summary.duration_ms
        );
        summary
    }

    async fn run_one(&self, table: &ConfiguredTable) -> SpecReport {
        let start = Instant::now();
        let spec = match &table.spec {
            Ok(spec) => spec,
            Err(e) => {
                tracing::error!("Skipping {}: {}", table.label, e);
                return SpecReport {
                    table: table.label.clone(),
                    mode: "unknown".to_string(),
                    status: SpecStatus::Failed {
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    },
                    duration_ms: 0,
                };
            }
        };

        tracing::info!(
            "Running {} on {} to {}...",
            spec.mode(),
            spec.source(),
            spec.destination()
        );
        let result = self.engine.run(spec).await;
        if let Err(e) = &result {
            tracing::error!("Failed to sync {}: {}", table.label, e);
        }

        SpecReport::from_result(
            table.label.clone(),
            spec.mode(),
            result,
            start.elapsed().as_millis() as u64,
        )
    }
}
