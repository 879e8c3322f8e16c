//! GenSync CLI
//!
//! Command-line tools for GenSync profiles.
//!
//! # Commands
//!
//! - `inspect` - Display the relations persisted for a profile
//! - `verify` - Verify a relations file
//! - `sync` - Synchronize two directories
//! - `version` - Show version information

mod commands;
mod directory;
mod error;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use gensync_engine::{ConflictPolicy, Direction, QueryRange, SyncMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// GenSync command-line tools.
#[derive(Parser)]
#[command(name = "gensync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the relations files
    #[arg(global = true, short, long)]
    state: Option<PathBuf>,

    /// Profile name; selects the relations file inside the state directory
    #[arg(global = true, short, long, default_value = "default")]
    profile: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display the relations persisted for a profile
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify the relations file of a profile
    Verify,

    /// Synchronize the files of two directories
    Sync {
        /// A-side directory
        a: PathBuf,

        /// B-side directory
        b: PathBuf,

        /// Reconciliation mode
        #[arg(short, long, value_enum, default_value_t = ModeArg::TwoWay)]
        mode: ModeArg,

        /// Conflict policy for two-way mode
        #[arg(short, long, value_enum, default_value_t = PolicyArg::Automatic)]
        conflicts: PolicyArg,

        /// Number of files processed per chunk
        #[arg(long, default_value = "100")]
        chunk_size: usize,

        /// Do not pair existing files with the same name and content
        #[arg(long)]
        no_matching: bool,

        /// Only pick up unrelated files modified at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only pick up unrelated files modified before this time (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Reconcile changes of both sides
    TwoWay,
    /// Make B an exact copy of A
    ReplicateAToB,
    /// Make A an exact copy of B
    ReplicateBToA,
    /// Copy A into B, leaving other B files alone
    MergeAToB,
    /// Copy B into A, leaving other A files alone
    MergeBToA,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::TwoWay => SyncMode::TwoWay,
            ModeArg::ReplicateAToB => SyncMode::OneWayReplicate(Direction::AToB),
            ModeArg::ReplicateBToA => SyncMode::OneWayReplicate(Direction::BToA),
            ModeArg::MergeAToB => SyncMode::OneWayMerge(Direction::AToB),
            ModeArg::MergeBToA => SyncMode::OneWayMerge(Direction::BToA),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    /// A always wins
    AWins,
    /// B always wins
    BWins,
    /// The more recently modified file wins
    Automatic,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::AWins => ConflictPolicy::AWins,
            PolicyArg::BWins => ConflictPolicy::BWins,
            PolicyArg::Automatic => ConflictPolicy::Automatic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let state = cli.state.ok_or("State directory required for inspect")?;
            commands::inspect::run(&state, &cli.profile, &format)?;
        }
        Commands::Verify => {
            let state = cli.state.ok_or("State directory required for verify")?;
            commands::verify::run(&state, &cli.profile)?;
        }
        Commands::Sync {
            a,
            b,
            mode,
            conflicts,
            chunk_size,
            no_matching,
            since,
            until,
            format,
        } => {
            let state = cli.state.ok_or("State directory required for sync")?;
            let options = commands::sync::SyncOptions {
                mode: mode.into(),
                conflict_policy: conflicts.into(),
                chunk_size,
                initial_matching: !no_matching,
                query_range: QueryRange {
                    from: since,
                    to: until,
                },
            };
            commands::sync::run(&state, &cli.profile, &a, &b, options, &format).await?;
        }
        Commands::Version => {
            println!("GenSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Relations format v{}",
                gensync_engine::RELATIONS_FORMAT_VERSION
            );
        }
    }

    Ok(())
}
