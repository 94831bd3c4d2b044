use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use roost_core::config::SyncConfig;
use roost_core::db::Database;
use roost_core::fetch::ReqwestTransport;
use roost_core::models::{analyze_errors, CronHealth, QueueItem, SyncRunLog};
use roost_core::sync::{BatchStatus, MicroAction, MicroOutcome};
use serde::Serialize;

use crate::error::CliError;

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("ROOST_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("roost")
        .join("roost.db")
}

pub fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(path)?)
}

/// Site configuration and an HTTP transport built from it
pub fn connect() -> Result<(SyncConfig, ReqwestTransport), CliError> {
    let config = SyncConfig::from_env()?;
    let transport = ReqwestTransport::from_config(&config)?;
    Ok((config, transport))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - at).num_minutes().max(0);
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if minutes < 24 * 60 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / (24 * 60))
    }
}

pub fn format_micro_outcome(outcome: &MicroOutcome) -> String {
    let action = serde_json::to_value(outcome.action)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    let mut line = action;
    if let Some(external_id) = &outcome.external_id {
        line.push_str(&format!(" {external_id}"));
    }
    if let Some(reason) = &outcome.reason {
        line.push_str(&format!(" ({reason})"));
    }
    if let Some(stats) = &outcome.scan {
        line.push_str(&format!(
            " {} found, {} skipped, {} queued across {} page(s)",
            stats.found, stats.skipped, stats.queued, stats.pages_scanned
        ));
        if let Some(cursor) = stats.cursor_advanced_to {
            line.push_str(&format!(", cursor now {cursor}"));
        }
    }
    if let Some(expires_at) = outcome.expires_at {
        line.push_str(&format!(", session valid until {}", format_timestamp(expires_at)));
    }
    if let Some(error) = &outcome.error {
        line.push_str(&format!(": {error}"));
    }
    if let Some(depth) = outcome.queue_depth.or_else(|| outcome.scan.as_ref().map(|s| s.queue_depth)) {
        line.push_str(&format!(" [queue depth {depth}]"));
    }
    line
}

/// Whether another detail step could make progress after `action`
pub const fn keeps_draining(action: MicroAction) -> bool {
    !matches!(
        action,
        MicroAction::Idle | MicroAction::Skipped | MicroAction::SessionCleared
    )
}

pub fn format_run_line(log: &SyncRunLog) -> String {
    format!(
        "{}  {:<11} {:<8} found={} created={} updated={} unchanged={} failed={} skipped={} archived={}",
        format_timestamp(log.started_at),
        log.sync_type.as_str(),
        log.status.as_str(),
        log.found,
        log.created,
        log.updated,
        log.unchanged,
        log.failed,
        log.skipped,
        log.archived
    )
}

/// Run summary followed by an error roll-up when the run recorded errors
pub fn format_run_report(log: &SyncRunLog) -> Vec<String> {
    let mut lines = vec![format_run_line(log)];
    if log.errors.is_empty() {
        return lines;
    }
    let summary = analyze_errors(&log.errors);
    lines.push(format!(
        "{} error(s), {} recoverable",
        summary.total, summary.recoverable
    ));
    for (category, count) in &summary.by_category {
        lines.push(format!("  {category}: {count}"));
    }
    if let Some(category) = summary.most_common {
        lines.push(format!(
            "  hint: {}. {}",
            category.description(),
            category.recommended_action()
        ));
    }
    lines
}

pub fn format_queue_line(item: &QueueItem) -> String {
    let mut line = format!(
        "{:<12} {:<10} retries={} queued={}",
        item.external_id,
        item.status.as_str(),
        item.retry_count,
        format_timestamp(item.queued_at)
    );
    if let Some(title) = &item.title {
        line.push_str(&format!("  {title}"));
    }
    if let Some(error) = &item.last_error {
        line.push_str(&format!("  last error: {error}"));
    }
    line
}

pub fn format_health_line(health: &CronHealth, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "{:<10} {:<7} {}",
        health.name,
        health.status.as_str(),
        format_relative_time(health.last_ran_at, now)
    );
    if let Some(error) = &health.error_message {
        line.push_str(&format!("  {error}"));
    } else if let Some(action) = health
        .result
        .as_ref()
        .and_then(|result| result.get("action"))
        .and_then(|action| action.as_str())
    {
        line.push_str(&format!("  {action}"));
    }
    line
}

pub fn format_batch_status_lines(status: &BatchStatus) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} {} ({} to {})",
            status.sync_type, status.status, status.target.start, status.target.end
        ),
        format!(
            "{}/{} days ({}%), {}/{} sub-ranges, {} appointments",
            status.days_completed,
            status.total_days,
            status.percent_complete,
            status.batches_completed,
            status.total_batches,
            status.appointments_processed
        ),
    ];
    if let Some(last) = status.last_completed {
        lines.push(format!("last completed day: {last}"));
    }
    if let Some(error) = &status.error_message {
        lines.push(format!("error: {error}"));
    }
    if status.resumable {
        lines.push(format!("resume with `roost {} resume`", status.sync_type));
    }
    lines
}
