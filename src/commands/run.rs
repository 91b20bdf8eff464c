// ABOUTME: run command - connect both sides and sync every selected table spec
// ABOUTME: Prints a per-table summary and fails when any spec failed

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::RunConfig;
use crate::connect::open_handle;
use crate::runner::{RunSummary, SpecStatus, SyncRunner};

pub async fn run(config_path: &Path, tables: &[String], allow_self_signed_certs: bool) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    let selected = config.select(tables);
    if selected.is_empty() {
        bail!(
            "No table specs selected from {} (requested: {:?})",
            config_path.display(),
            tables
        );
    }

    let source = open_handle(&config.source, allow_self_signed_certs, &config.retry)
        .await
        .context("Failed to open source connection")?;
    let destination = open_handle(&config.destination, allow_self_signed_certs, &config.retry)
        .await
        .context("Failed to open destination connection")?;

    let runner = SyncRunner::new(source.as_ref(), destination.as_ref(), config.retry.clone());
    let summary = runner.run(&selected).await;
    print_summary(&summary);

    if !summary.is_success() {
        bail!("{} of {} table(s) failed", summary.failed, summary.reports.len());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    for report in &summary.reports {
        let detail = match &report.status {
            SpecStatus::Completed {
                outcome,
                rows_copied,
                counts_matched,
            } => format!(
                "{} ({} rows{})",
                outcome,
                rows_copied,
                if *counts_matched { "" } else { ", row counts differ" }
            ),
            SpecStatus::NoOp { reason } => reason.clone(),
            SpecStatus::Failed { kind, error } => format!("FAILED [{}]: {}", kind, error),
        };
        println!(
            "  {} [{}] {} in {}ms",
            report.table, report.mode, detail, report.duration_ms
        );
    }
    println!();
    println!(
        "{} completed, {} no-op, {} failed, {} rows copied in {}ms",
        summary.completed, summary.noop, summary.failed, summary.rows_copied, summary.duration_ms
    );
}
