//! Roost CLI - run and inspect the booking-site sync from the terminal
//!
//! Each scheduled entry point is a subcommand, so a cron table or systemd
//! timer can drive the same code paths an operator runs by hand.

mod cli;
mod commands;
mod error;


use clap::Parser;
use roost_core::models::SyncType;

use crate::cli::{Cli, Commands};
use crate::commands::batch::run_batch;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::logs::{run_health, run_logs, run_queue};
use crate::commands::micro::{run_auth, run_detail, run_scan};
use crate::commands::sync::{run_sync, sync_options};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "roost=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Auth { json } => run_auth(json, &db_path).await?,
        Commands::Scan { json } => run_scan(json, &db_path).await?,
        Commands::Detail { count, json } => run_detail(count, json, &db_path).await?,
        Commands::Sync {
            start,
            end,
            full,
            force,
            json,
        } => {
            let options = sync_options(start, end, full, force);
            run_sync(&options, json, &db_path).await?;
        }
        Commands::Batch { command } => run_batch(SyncType::Batch, command, &db_path).await?,
        Commands::Historical { command } => {
            run_batch(SyncType::Historical, command, &db_path).await?;
        }
        Commands::Queue {
            status,
            limit,
            json,
        } => run_queue(status, limit, json, &db_path)?,
        Commands::Logs { limit, json } => run_logs(limit, json, &db_path)?,
        Commands::Health { json } => run_health(json, &db_path)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
