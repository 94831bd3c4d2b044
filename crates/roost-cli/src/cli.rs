use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use roost_core::models::QueueStatus;

#[derive(Parser)]
#[command(name = "roost")]
#[command(about = "Mirror boarding appointments from the booking site into a local store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Refresh the cached booking-site session when it has expired
    Auth {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Scan the schedule and queue boarding appointments
    Scan {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Process queued appointments, one per step
    Detail {
        /// Maximum number of queue items to process
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a full sync pass over a date window
    Sync {
        /// First day to scan (defaults to today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        start: Option<NaiveDate>,
        /// Last day to scan, inclusive (defaults to one week from start)
        #[arg(long, value_name = "YYYY-MM-DD")]
        end: Option<NaiveDate>,
        /// Count misses for deletion detection instead of reconciling
        #[arg(long)]
        full: bool,
        /// Rewrite records even when their content is unchanged
        #[arg(long)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Day-by-day resumable sync over a long range
    Batch {
        #[command(subcommand)]
        command: BatchCommands,
    },
    /// Month-by-month resumable backfill
    Historical {
        #[command(subcommand)]
        command: BatchCommands,
    },
    /// List queue items by status
    Queue {
        /// Status to list
        #[arg(long, default_value = "pending")]
        status: QueueStatus,
        /// Number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent sync runs
    Logs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the health of each scheduled entry point
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Start syncing a range, continuing a matching checkpoint
    Start {
        /// First day of the range
        #[arg(long, value_name = "YYYY-MM-DD")]
        start: NaiveDate,
        /// Last day of the range, inclusive
        #[arg(long, value_name = "YYYY-MM-DD")]
        end: NaiveDate,
    },
    /// Resume the active checkpoint
    Resume,
    /// Show checkpoint progress
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel the active checkpoint
    Cancel,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
