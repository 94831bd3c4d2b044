//! Sync run log repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{get_enum, get_json, get_opt_time, get_time, millis, opt_millis};
use crate::error::{Error, Result};
use crate::models::{RunError, SyncRunLog};

const LOG_COLUMNS: &str = "id, sync_type, status, started_at, completed_at, found, created, updated, unchanged, failed, skipped, archived, errors, change_details, duration_ms";

/// Message recorded on runs aborted by the stuck-run sweep
pub const STUCK_RUN_MESSAGE: &str = "Sync timed out and was aborted";

/// Trait for run log storage operations
pub trait RunLogRepository {
    fn insert(&self, log: &SyncRunLog) -> Result<()>;

    fn update(&self, log: &SyncRunLog) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<SyncRunLog>>;

    /// Newest runs first
    fn list_recent(&self, limit: usize) -> Result<Vec<SyncRunLog>>;

    /// Fail every run still `running` that started before `cutoff`
    fn abort_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize>;
}

/// `SQLite` implementation of `RunLogRepository`
pub struct SqliteRunLogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRunLogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRunLog> {
        Ok(SyncRunLog {
            id: row.get(0)?,
            sync_type: get_enum(row, 1)?,
            status: get_enum(row, 2)?,
            started_at: get_time(row, 3)?,
            completed_at: get_opt_time(row, 4)?,
            found: row.get(5)?,
            created: row.get(6)?,
            updated: row.get(7)?,
            unchanged: row.get(8)?,
            failed: row.get(9)?,
            skipped: row.get(10)?,
            archived: row.get(11)?,
            errors: get_json(row, 12)?,
            change_details: get_json(row, 13)?,
            duration_ms: row.get(14)?,
        })
    }
}

impl RunLogRepository for SqliteRunLogRepository<'_> {
    fn insert(&self, log: &SyncRunLog) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO sync_logs ({LOG_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                log.id,
                log.sync_type.as_str(),
                log.status.as_str(),
                millis(log.started_at),
                opt_millis(log.completed_at),
                log.found,
                log.created,
                log.updated,
                log.unchanged,
                log.failed,
                log.skipped,
                log.archived,
                serde_json::to_string(&log.errors)?,
                serde_json::to_string(&log.change_details)?,
                log.duration_ms,
            ],
        )?;
        Ok(())
    }

    fn update(&self, log: &SyncRunLog) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_logs
             SET status = ?, completed_at = ?, found = ?, created = ?, updated = ?, unchanged = ?,
                 failed = ?, skipped = ?, archived = ?, errors = ?, change_details = ?, duration_ms = ?
             WHERE id = ?",
            params![
                log.status.as_str(),
                opt_millis(log.completed_at),
                log.found,
                log.created,
                log.updated,
                log.unchanged,
                log.failed,
                log.skipped,
                log.archived,
                serde_json::to_string(&log.errors)?,
                serde_json::to_string(&log.change_details)?,
                log.duration_ms,
                log.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("sync log {}", log.id)));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<SyncRunLog>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {LOG_COLUMNS} FROM sync_logs WHERE id = ?"),
                params![id],
                Self::parse_log,
            )
            .optional()?)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<SyncRunLog>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM sync_logs ORDER BY started_at DESC LIMIT ?"
        ))?;

        let logs = stmt
            .query_map(params![limit as i64], Self::parse_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(logs)
    }

    fn abort_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let errors = serde_json::to_string(&[RunError::new(None, STUCK_RUN_MESSAGE)])?;
        let rows = self.conn.execute(
            "UPDATE sync_logs
             SET status = 'failed', completed_at = ?, errors = ?, duration_ms = ? - started_at
             WHERE status = 'running' AND started_at < ?",
            params![millis(now), errors, millis(now), millis(cutoff)],
        )?;

        if rows > 0 {
            tracing::warn!("Aborted {rows} stuck sync run(s)");
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::Database;
    use crate::models::{RunStatus, SyncType};

    #[test]
    fn abort_stuck_only_touches_old_running_rows() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteRunLogRepository::new(db.connection());
        let now = Utc::now();

        let stuck = SyncRunLog::start(SyncType::Incremental, now - Duration::minutes(45));
        let fresh = SyncRunLog::start(SyncType::Incremental, now - Duration::minutes(5));
        repo.insert(&stuck).unwrap();
        repo.insert(&fresh).unwrap();

        let aborted = repo.abort_stuck(now - Duration::minutes(30), now).unwrap();
        assert_eq!(aborted, 1);

        let stuck = repo.get(&stuck.id).unwrap().unwrap();
        assert_eq!(stuck.status, RunStatus::Failed);
        assert_eq!(stuck.errors[0].message, STUCK_RUN_MESSAGE);
        assert_eq!(
            repo.get(&fresh.id).unwrap().unwrap().status,
            RunStatus::Running
        );
    }

    #[test]
    fn list_recent_returns_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteRunLogRepository::new(db.connection());
        let now = Utc::now();

        let older = SyncRunLog::start(SyncType::Full, now - Duration::hours(2));
        let newer = SyncRunLog::start(SyncType::Full, now);
        repo.insert(&older).unwrap();
        repo.insert(&newer).unwrap();

        let logs = repo.list_recent(10).unwrap();
        assert_eq!(logs[0].id, newer.id);
        assert_eq!(logs.len(), 2);
    }
}
