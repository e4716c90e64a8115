//! strata CLI
//!
//! Maintenance tools for strata database directories.
//!
//! # Commands
//!
//! - `inspect` - List pages, their kinds and the object directory
//! - `dump-log` - Print write-ahead log records
//! - `recover` - Run crash recovery and report what it did

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// strata command-line database tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pages and the object directory
    Inspect {
        /// Show one line per page
        #[arg(short = 'P', long)]
        pages: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print write-ahead log records
    DumpLog {
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only print records of this transaction
        #[arg(short, long)]
        txn: Option<i32>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run crash recovery
    Recover {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { pages, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, pages, &format)?;
        }
        Commands::DumpLog { limit, txn, format } => {
            let path = cli.path.ok_or("Database path required for dump-log")?;
            commands::dump_log::run(&path, limit, txn, &format)?;
        }
        Commands::Recover { format } => {
            let path = cli.path.ok_or("Database path required for recover")?;
            commands::recover::run(&path, &format)?;
        }
        Commands::Version => {
            println!("strata CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("strata core v{}", strata_core::VERSION);
        }
    }

    Ok(())
}
