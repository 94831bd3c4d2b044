//! Checkpoint repository implementation

use rusqlite::{params, Connection, OptionalExtension};

use super::{date_text, get_date, get_enum, get_opt_date, get_time, millis};
use crate::error::{Error, Result};
use crate::models::{Checkpoint, DateRange, SyncType};

const CHECKPOINT_COLUMNS: &str = "id, sync_type, target_start, target_end, last_completed_date, total_batches, batches_completed, appointments_processed, status, error_message, created_at, updated_at";

/// Trait for checkpoint storage operations
pub trait CheckpointRepository {
    fn insert(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn update(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Newest in-progress or paused checkpoint of a sync type
    fn find_active(&self, sync_type: SyncType) -> Result<Option<Checkpoint>>;

    /// Newest checkpoint of a sync type in any state
    fn find_latest(&self, sync_type: SyncType) -> Result<Option<Checkpoint>>;
}

/// `SQLite` implementation of `CheckpointRepository`
pub struct SqliteCheckpointRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCheckpointRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
        Ok(Checkpoint {
            id: row.get(0)?,
            sync_type: get_enum(row, 1)?,
            target: DateRange::new(get_date(row, 2)?, get_date(row, 3)?),
            last_completed: get_opt_date(row, 4)?,
            total_batches: row.get(5)?,
            batches_completed: row.get(6)?,
            appointments_processed: row.get(7)?,
            status: get_enum(row, 8)?,
            error_message: row.get(9)?,
            created_at: get_time(row, 10)?,
            updated_at: get_time(row, 11)?,
        })
    }

    fn newest(&self, filter: &str, sync_type: SyncType) -> Result<Option<Checkpoint>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
                     WHERE sync_type = ? {filter}
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1"
                ),
                params![sync_type.as_str()],
                Self::parse_checkpoint,
            )
            .optional()?)
    }
}

impl CheckpointRepository for SqliteCheckpointRepository<'_> {
    fn insert(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO sync_checkpoints ({CHECKPOINT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                checkpoint.id,
                checkpoint.sync_type.as_str(),
                date_text(checkpoint.target.start),
                date_text(checkpoint.target.end),
                checkpoint.last_completed.map(date_text),
                checkpoint.total_batches,
                checkpoint.batches_completed,
                checkpoint.appointments_processed,
                checkpoint.status.as_str(),
                checkpoint.error_message,
                millis(checkpoint.created_at),
                millis(checkpoint.updated_at),
            ],
        )?;
        Ok(())
    }

    fn update(&self, checkpoint: &Checkpoint) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_checkpoints
             SET last_completed_date = ?, total_batches = ?, batches_completed = ?,
                 appointments_processed = ?, status = ?, error_message = ?, updated_at = ?
             WHERE id = ?",
            params![
                checkpoint.last_completed.map(date_text),
                checkpoint.total_batches,
                checkpoint.batches_completed,
                checkpoint.appointments_processed,
                checkpoint.status.as_str(),
                checkpoint.error_message,
                millis(checkpoint.updated_at),
                checkpoint.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("checkpoint {}", checkpoint.id)));
        }
        Ok(())
    }

    fn find_active(&self, sync_type: SyncType) -> Result<Option<Checkpoint>> {
        self.newest("AND status IN ('in_progress', 'paused')", sync_type)
    }

    fn find_latest(&self, sync_type: SyncType) -> Result<Option<Checkpoint>> {
        self.newest("", sync_type)
    }
}
