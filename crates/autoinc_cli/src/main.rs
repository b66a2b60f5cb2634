//! autoinc CLI
//!
//! Command-line tools for durable autoinc counter directories.
//!
//! # Commands
//!
//! - `inspect` - List counters and log statistics
//! - `peek` - Show the value the next allocation would likely return
//! - `next` - Allocate a value
//! - `reconcile` - Pull a counter forward to an explicit value
//! - `reset` - Re-seed a counter to its starting value
//! - `compact` - Rewrite the counter log

mod commands;

use clap::{Parser, Subcommand};
use commands::sequence::SequenceArgs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// autoinc counter store tools.
#[derive(Parser)]
#[command(name = "autoinc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the counter store directory
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
    /// List counters and log statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the value the next allocation would likely return
    Peek(SequenceArgs),

    /// Allocate the next value
    Next(SequenceArgs),

    /// Pull a counter forward to an explicitly used value
    Reconcile {
        #[command(flatten)]
        sequence: SequenceArgs,

        /// The value already in use
        #[arg(long, allow_hyphen_values = true)]
        value: i64,
    },

    /// Re-seed a counter so the next allocation returns its start value
    Reset(SequenceArgs),

    /// Rewrite the counter log as one frame per counter
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Peek(args) => {
            let path = cli.path.ok_or("Store path required for peek")?;
            println!("{}", commands::sequence::peek(&path, &args)?);
        }
        Commands::Next(args) => {
            let path = cli.path.ok_or("Store path required for next")?;
            println!("{}", commands::sequence::next(&path, &args)?);
        }
        Commands::Reconcile { sequence, value } => {
            let path = cli.path.ok_or("Store path required for reconcile")?;
            let next = commands::sequence::reconcile(&path, &sequence, value)?;
            println!("Reconciled with {value}; next value is {next}");
        }
        Commands::Reset(args) => {
            let path = cli.path.ok_or("Store path required for reset")?;
            let start = commands::sequence::reset(&path, &args)?;
            println!("Reset {}; next value is {start}", args.key());
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("autoinc CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("autoinc core v{}", autoinc_core::VERSION);
        }
    }

    Ok(())
}
