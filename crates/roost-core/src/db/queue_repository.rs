//! Work queue repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{get_enum, get_opt_time, get_time, millis, opt_millis};
use crate::error::{Error, Result};
use crate::models::{QueueItem, QueueStatus};

const QUEUE_COLUMNS: &str = "id, external_id, source_url, title, status, retry_count, next_retry_at, last_error, queued_at, processing_started_at, processed_at";

/// Trait for queue storage operations
pub trait QueueRepository {
    fn get(&self, id: &str) -> Result<Option<QueueItem>>;

    fn get_by_external_id(&self, external_id: &str) -> Result<Option<QueueItem>>;

    fn insert(&self, item: &QueueItem) -> Result<()>;

    /// Persist every mutable field of an existing item
    fn update(&self, item: &QueueItem) -> Result<()>;

    /// Oldest pending items whose retry time has come, by queue time
    fn list_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>>;

    /// Move a pending item to processing; false when another worker got it first
    fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Return items stuck in processing since before `cutoff` to pending
    fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn count_by_status(&self, status: QueueStatus) -> Result<usize>;

    fn list_by_status(&self, status: QueueStatus, limit: usize) -> Result<Vec<QueueItem>>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        Ok(QueueItem {
            id: row.get(0)?,
            external_id: row.get(1)?,
            source_url: row.get(2)?,
            title: row.get(3)?,
            status: get_enum(row, 4)?,
            retry_count: row.get(5)?,
            next_retry_at: get_opt_time(row, 6)?,
            last_error: row.get(7)?,
            queued_at: get_time(row, 8)?,
            processing_started_at: get_opt_time(row, 9)?,
            processed_at: get_opt_time(row, 10)?,
        })
    }

    fn query_one(&self, filter: &str, value: &str) -> Result<Option<QueueItem>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE {filter}"),
                params![value],
                Self::parse_item,
            )
            .optional()?)
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        self.query_one("id = ?", id)
    }

    fn get_by_external_id(&self, external_id: &str) -> Result<Option<QueueItem>> {
        self.query_one("external_id = ?", external_id)
    }

    fn insert(&self, item: &QueueItem) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO sync_queue ({QUEUE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                item.id,
                item.external_id,
                item.source_url,
                item.title,
                item.status.as_str(),
                item.retry_count,
                opt_millis(item.next_retry_at),
                item.last_error,
                millis(item.queued_at),
                opt_millis(item.processing_started_at),
                opt_millis(item.processed_at),
            ],
        )?;
        Ok(())
    }

    fn update(&self, item: &QueueItem) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_queue
             SET source_url = ?, title = ?, status = ?, retry_count = ?, next_retry_at = ?,
                 last_error = ?, queued_at = ?, processing_started_at = ?, processed_at = ?
             WHERE id = ?",
            params![
                item.source_url,
                item.title,
                item.status.as_str(),
                item.retry_count,
                opt_millis(item.next_retry_at),
                item.last_error,
                millis(item.queued_at),
                opt_millis(item.processing_started_at),
                opt_millis(item.processed_at),
                item.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("queue item {}", item.id)));
        }
        Ok(())
    }

    fn list_eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?)
             ORDER BY queued_at, id
             LIMIT ?"
        ))?;

        let items = stmt
            .query_map(params![millis(now), limit as i64], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }

    fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'processing', processing_started_at = ?
             WHERE id = ? AND status = 'pending'",
            params![millis(now), id],
        )?;
        Ok(rows == 1)
    }

    fn reset_stuck(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET status = 'pending', processing_started_at = NULL
             WHERE status = 'processing' AND processing_started_at < ?",
            params![millis(cutoff)],
        )?;
        Ok(rows)
    }

    fn count_by_status(&self, status: QueueStatus) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = ?",
            params![status.as_str()],
            |row| row.get::<_, usize>(0),
        )?;
        Ok(count)
    }

    fn list_by_status(&self, status: QueueStatus, limit: usize) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE status = ? ORDER BY queued_at LIMIT ?"
        ))?;

        let items = stmt
            .query_map(params![status.as_str(), limit as i64], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(items)
    }
}
