//! driftsync CLI
//!
//! Command-line tools for the state a driftsync engine keeps on a device
//! and for the snapshot documents it uploads.
//!
//! # Commands
//!
//! - `inspect` - Display device id, last-sync marker and cache entries
//! - `clear-cache` - Drop the persisted content cache
//! - `hash` - Print the content hash of a JSON snapshot
//! - `pack` - Wrap a JSON snapshot into an uploadable document
//! - `unpack` - Validate a document and print the snapshot inside it

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// driftsync command-line tools.
#[derive(Parser)]
#[command(name = "driftsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync state directory
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
    /// Display device id, last-sync marker and cache entries
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drop the persisted content cache so the next sync uploads
    ClearCache,

    /// Print the content hash of a JSON snapshot
    Hash {
        /// Snapshot file
        file: PathBuf,

        /// Hash algorithm (sha256, fnv1a)
        #[arg(short, long, default_value = "sha256")]
        algorithm: String,
    },

    /// Wrap a JSON snapshot into an uploadable document
    Pack {
        /// Snapshot file
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Device id recorded in the document
        #[arg(short, long, default_value = "driftsync-cli")]
        device: String,

        /// Minimum size in bytes before compression is attempted
        #[arg(short, long, default_value = "1024")]
        threshold: usize,
    },

    /// Validate a document and print the snapshot inside it
    Unpack {
        /// Document file
        input: PathBuf,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
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
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("State path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::ClearCache => {
            let path = cli.path.ok_or("State path required for clear-cache")?;
            commands::clear_cache::run(&path)?;
        }
        Commands::Hash { file, algorithm } => {
            commands::hash::run(&file, &algorithm)?;
        }
        Commands::Pack {
            input,
            output,
            device,
            threshold,
        } => {
            commands::pack::run(&input, output.as_deref(), &device, threshold)?;
        }
        Commands::Unpack { input, output } => {
            commands::unpack::run(&input, output.as_deref())?;
        }
        Commands::Version => {
            println!("driftsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("driftsync Engine v{}", driftsync_engine::VERSION);
            println!("Snapshot format v{}", driftsync_engine::FORMAT_VERSION);
        }
    }

    Ok(())
}
