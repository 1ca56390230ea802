//! boardsync CLI
//!
//! Mirrors Monday.com boards and Calendly events into a local SQLite file.
//!
//! # Commands
//!
//! - `sync` - Run the sync pipeline for some or all configured sources
//! - `status` - Show table freshness and recent sync runs
//! - `show` - Dump a mirrored table as JSON lines
//! - `version` - Show version information

mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sync paginated APIs into a local SQLite database.
#[derive(Parser)]
#[command(name = "boardsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file (default: boardsync.yaml, if present)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database, overriding the config file
    #[arg(global = true, long)]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync sources into their tables
    Sync {
        /// Names of the sources to sync
        #[arg(required_unless_present = "all")]
        sources: Vec<String>,

        /// Sync every configured source concurrently
        #[arg(short, long, conflicts_with = "sources")]
        all: bool,
    },

    /// Show table freshness and recent runs
    Status {
        /// Number of recent runs to list
        #[arg(short, long, default_value = "10")]
        runs: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump a table as JSON lines
    Show {
        /// Table to dump
        table: String,

        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Best-effort .env load; tokens may live there
    let _ = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync { sources, all } => {
            let config = AppConfig::discover(cli.config.as_deref())?;
            let db = config.database_path(cli.db.as_deref());
            commands::sync::run(&config, &db, &sources, all)?;
        }
        Commands::Status { runs, format } => {
            let config = AppConfig::discover(cli.config.as_deref())?;
            let db = config.database_path(cli.db.as_deref());
            commands::status::run(&db, runs, &format)?;
        }
        Commands::Show { table, limit } => {
            let config = AppConfig::discover(cli.config.as_deref())?;
            let db = config.database_path(cli.db.as_deref());
            commands::show::run(&db, &table, limit)?;
        }
        Commands::Version => {
            println!("boardsync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
