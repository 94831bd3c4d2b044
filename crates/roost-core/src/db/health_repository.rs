//! Health rows for scheduled entry points

use rusqlite::{params, Connection, OptionalExtension};

use super::{get_enum, get_opt_json, get_time, millis};
use crate::error::Result;
use crate::models::CronHealth;

/// Trait for scheduled-job health storage
pub trait HealthRepository {
    /// Insert or replace the row for `health.name`
    fn upsert(&self, health: &CronHealth) -> Result<()>;

    fn get(&self, name: &str) -> Result<Option<CronHealth>>;

    fn list(&self) -> Result<Vec<CronHealth>>;
}

/// `SQLite` implementation of `HealthRepository`
pub struct SqliteHealthRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteHealthRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_health(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronHealth> {
        Ok(CronHealth {
            name: row.get(0)?,
            last_ran_at: get_time(row, 1)?,
            status: get_enum(row, 2)?,
            result: get_opt_json(row, 3)?,
            error_message: row.get(4)?,
        })
    }
}

impl HealthRepository for SqliteHealthRepository<'_> {
    fn upsert(&self, health: &CronHealth) -> Result<()> {
        let result = health.result.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO cron_health (cron_name, last_ran_at, status, result, error_msg)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(cron_name) DO UPDATE SET
                 last_ran_at = excluded.last_ran_at,
                 status = excluded.status,
                 result = excluded.result,
                 error_msg = excluded.error_msg",
            params![
                health.name,
                millis(health.last_ran_at),
                health.status.as_str(),
                result,
                health.error_message,
            ],
        )?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<CronHealth>> {
        Ok(self
            .conn
            .query_row(
                "SELECT cron_name, last_ran_at, status, result, error_msg FROM cron_health WHERE cron_name = ?",
                params![name],
                Self::parse_health,
            )
            .optional()?)
    }

    fn list(&self) -> Result<Vec<CronHealth>> {
        let mut stmt = self.conn.prepare(
            "SELECT cron_name, last_ran_at, status, result, error_msg FROM cron_health ORDER BY cron_name",
        )?;

        let rows = stmt
            .query_map([], Self::parse_health)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }
}
