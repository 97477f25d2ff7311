//! DCP CLI
//!
//! Command-line tools for differential checkpoint runs.
//!
//! # Commands
//!
//! - `demo` - Run the two-variable checkpoint/recover scenario
//! - `inspect` - Display a rank's checkpoint metadata and file sizes
//! - `dump-layers` - Dump base headers and delta records of a layered file

mod commands;

use clap::{Parser, Subcommand};
use dcp_core::DigestKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Differential checkpointing tools.
#[derive(Parser)]
#[command(name = "dcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base directory for checkpoint runs
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the two-variable checkpoint and recovery scenario
    Demo {
        /// Block digest (SHA256, MD5, CRC32)
        #[arg(long, default_value = "SHA256")]
        hash: DigestKind,

        /// Block size in bytes (multiple of 4)
        #[arg(short, long, default_value = "128")]
        block_size: u64,

        /// Layers per layered file
        #[arg(short, long, default_value = "5")]
        stack_size: u64,
    },

    /// Display checkpoint metadata of one rank
    Inspect {
        /// Run directory (`<base_dir>/<run_id>`)
        run_dir: PathBuf,

        /// Rank to inspect
        #[arg(short, long, default_value = "0")]
        rank: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the records of a rank's current layered file
    DumpLayers {
        /// Run directory (`<base_dir>/<run_id>`)
        run_dir: PathBuf,

        /// Rank to dump
        #[arg(short, long, default_value = "0")]
        rank: u32,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

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
        Commands::Demo {
            hash,
            block_size,
            stack_size,
        } => {
            let base_dir = cli.dir.unwrap_or_else(|| PathBuf::from("."));
            let outcome = commands::demo::run(&base_dir, hash, block_size, stack_size)?;
            if !outcome.success() {
                return Err("recovered buffers do not match the checkpointed content".into());
            }
        }
        Commands::Inspect {
            run_dir,
            rank,
            format,
        } => {
            commands::inspect::run(&run_dir, rank, &format)?;
        }
        Commands::DumpLayers {
            run_dir,
            rank,
            limit,
            format,
        } => {
            commands::dump_layers::run(&run_dir, rank, limit, &format)?;
        }
        Commands::Version => {
            println!("DCP CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("DCP Core v{}", dcp_core::VERSION);
        }
    }

    Ok(())
}
