// ABOUTME: check command - validate a run configuration without connecting anywhere
// ABOUTME: Prints every table spec or the configuration error that rejected it

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::RunConfig;

pub async fn check(config_path: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)?;

    println!("Direction: {:?}", config.direction);
    println!("Source: {:?}", config.source);
    println!("Destination: {:?}", config.destination);
    println!(
        "Retry: {} attempts, initial delay {}ms",
        config.retry.max_retries, config.retry.initial_delay_ms
    );
    println!();

    let mut invalid = 0;
    for table in &config.tables {
        match &table.spec {
            Ok(spec) => println!(
                "  ok    {} ({}: {} -> {})",
                table.label,
                spec.mode(),
                spec.source(),
                spec.destination()
            ),
            Err(e) => {
                invalid += 1;
                println!("  error {}: {}", table.label, e);
            }
        }
    }

    if invalid > 0 {
        bail!(
            "{} of {} table spec(s) in {} are invalid",
            invalid,
            config.tables.len(),
            config_path.display()
        );
    }
    println!();
    println!("✓ {} table spec(s) are valid", config.tables.len());
    Ok(())
}
