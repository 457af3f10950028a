//! xapool CLI
//!
//! Command-line tools that drive the pooling XA provider against a
//! simulated resource manager.
//!
//! # Commands
//!
//! - `simulate` - Run a two-phase-commit workload and report pool usage
//! - `recover` - Prepare branches, restart from a snapshot and resolve them

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// xapool command-line tools.
#[derive(Parser)]
#[command(name = "xapool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a two-phase-commit workload and report pool usage
    Simulate {
        /// Number of branches to run
        #[arg(short, long, default_value = "10")]
        branches: u32,

        /// Prepared branches kept waiting before the oldest is committed
        #[arg(short, long, default_value = "3")]
        in_flight: usize,

        /// Abort every Nth branch with fail-and-rollback
        #[arg(long)]
        fail_every: Option<u32>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Prepare branches, restart from a snapshot and resolve them
    Recover {
        /// Number of branches left prepared by the first process
        #[arg(short, long, default_value = "3")]
        prepared: u32,

        /// Commit recovered branches instead of rolling them back
        #[arg(short, long)]
        commit: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            branches,
            in_flight,
            fail_every,
            format,
        } => {
            commands::simulate::run(branches, in_flight, fail_every, &format)?;
        }
        Commands::Recover {
            prepared,
            commit,
            format,
        } => {
            commands::recover::run(prepared, commit, &format)?;
        }
        Commands::Version => {
            println!("xapool CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
