// ABOUTME: compare command - snapshot watermarks and row counts on both sides
// ABOUTME: Read-only; optionally appends the snapshots to a JSON lines history file

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use crate::compare::{append_history, compare_table};
use crate::config::RunConfig;
use crate::connect::open_handle;

pub async fn compare(
    config_path: &Path,
    history: Option<&Path>,
    allow_self_signed_certs: bool,
) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    let source = open_handle(&config.source, allow_self_signed_certs, &config.retry)
        .await
        .context("Failed to open source connection")?;
    let destination = open_handle(&config.destination, allow_self_signed_certs, &config.retry)
        .await
        .context("Failed to open destination connection")?;

    let snap_time = Utc::now();
    let mut comparisons = Vec::new();
    for table in &config.tables {
        let spec = match &table.spec {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", table.label, e);
                continue;
            }
        };
        let comparison = compare_table(source.as_ref(), destination.as_ref(), spec, snap_time)
            .await
            .with_context(|| format!("Failed to compare {}", table.label))?;
        println!("{}", comparison.summary_line());
        comparisons.push(comparison);
    }

    if let Some(path) = history {
        append_history(path, &comparisons)?;
        tracing::info!(
            "Appended {} comparison(s) to {}",
            comparisons.len(),
            path.display()
        );
    }
    Ok(())
}
