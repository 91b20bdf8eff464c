// ABOUTME: CLI entry point for table-syncer
// ABOUTME: Parses commands and routes to the run, check and compare handlers

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use table_syncer::commands;

#[derive(Parser)]
#[command(name = "table-syncer")]
#[command(about = "Incremental watermark-based table sync between databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every configured table (or only the selected ones)
    Run {
        /// Path to the TOML run configuration
        #[arg(long, env = "TABLE_SYNCER_CONFIG")]
        config: PathBuf,
        /// Only run specs whose source or destination table matches (repeatable)
        #[arg(long = "table")]
        tables: Vec<String>,
    },
    /// Validate the run configuration without connecting to either database
    Check {
        #[arg(long, env = "TABLE_SYNCER_CONFIG")]
        config: PathBuf,
    },
    /// Compare watermarks and row counts between source and destination
    Compare {
        #[arg(long, env = "TABLE_SYNCER_CONFIG")]
        config: PathBuf,
        /// Append the snapshots to this JSON lines file
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { config, tables } => {
            commands::run(&config, &tables, cli.allow_self_signed_certs).await
        }
        Commands::Check { config } => commands::check(&config).await,
        Commands::Compare { config, history } => {
            commands::compare(&config, history.as_deref(), cli.allow_self_signed_certs).await
        }
    }
}
