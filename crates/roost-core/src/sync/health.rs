//! Health rows written by each scheduled entry point

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value;

use crate::db::{HealthRepository, SqliteHealthRepository};
use crate::error::Result;
use crate::models::{CronHealth, HealthStatus};
use crate::util::sanitize_error;

/// Upsert the health row for `name` from an entry point's outcome
pub fn record_health(
    conn: &Connection,
    name: &str,
    now: DateTime<Utc>,
    outcome: std::result::Result<Value, String>,
) -> Result<()> {
    let health = match outcome {
        Ok(result) => CronHealth {
            name: name.to_string(),
            last_ran_at: now,
            status: HealthStatus::Success,
            result: Some(result),
            error_message: None,
        },
        Err(message) => CronHealth {
            name: name.to_string(),
            last_ran_at: now,
            status: HealthStatus::Failure,
            result: None,
            error_message: Some(sanitize_error(&message)),
        },
    };
    SqliteHealthRepository::new(conn).upsert(&health)
}

/// Like [`record_health`], logging instead of failing so a broken health
/// write never masks the entry point's own result
pub fn record_health_quietly(
    conn: &Connection,
    name: &str,
    now: DateTime<Utc>,
    outcome: std::result::Result<Value, String>,
) {
    if let Err(e) = record_health(conn, name, now, outcome) {
        tracing::warn!(name, "Failed to write health row: {e}");
    }
}
