use std::path::Path;

use chrono::Utc;
use roost_core::db::{HealthRepository, RunLogRepository, SqliteHealthRepository, SqliteRunLogRepository};
use roost_core::models::QueueStatus;
use roost_core::sync::SyncQueue;

use crate::commands::common::{
    format_health_line, format_queue_line, format_run_line, open_database, print_json,
};
use crate::error::CliError;

pub fn run_logs(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let logs = SqliteRunLogRepository::new(db.connection()).list_recent(limit)?;

    if as_json {
        return print_json(&logs);
    }
    if logs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }
    for log in &logs {
        println!("{}", format_run_line(log));
    }
    Ok(())
}

pub fn run_health(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let rows = SqliteHealthRepository::new(db.connection()).list()?;

    if as_json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No scheduled jobs have run yet.");
        return Ok(());
    }
    let now = Utc::now();
    for row in &rows {
        println!("{}", format_health_line(row, now));
    }
    Ok(())
}

pub fn run_queue(
    status: QueueStatus,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let queue = SyncQueue::new(db.connection());
    let items = queue.list(status, limit)?;

    if as_json {
        return print_json(&items);
    }
    println!("queue depth: {}", queue.depth()?);
    for item in &items {
        println!("{}", format_queue_line(item));
    }
    Ok(())
}
