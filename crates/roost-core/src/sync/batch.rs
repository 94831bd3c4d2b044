//! Resumable multi-range syncs.
//!
//! A long range is split into day-sized (batch) or calendar-month (historical)
//! sub-ranges. Progress is persisted in a [`Checkpoint`] after every
//! sub-range, so an interrupted run resumes from the day after the last one
//! that finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::orchestrator::{SyncEngine, SyncOptions};
use crate::db::{CheckpointRepository, SqliteCheckpointRepository};
use crate::error::{Error, Result};
use crate::fetch::Transport;
use crate::models::{Checkpoint, CheckpointStatus, DateRange, RunStatus, SyncRunLog, SyncType};
use crate::util::{pause, sanitize_error};

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitUnit {
    Day,
    Month,
}

impl SplitUnit {
    pub const fn for_sync_type(sync_type: SyncType) -> Self {
        match sync_type {
            SyncType::Historical => Self::Month,
            _ => Self::Day,
        }
    }
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).map_or(date, |next| next - Duration::days(1))
}

/// Consecutive sub-ranges covering `range`, in order
pub fn split_range(range: DateRange, unit: SplitUnit) -> Vec<DateRange> {
    let mut ranges = Vec::new();
    let mut cursor = range.start;
    while cursor <= range.end {
        let end = match unit {
            SplitUnit::Day => cursor,
            SplitUnit::Month => last_day_of_month(cursor).min(range.end),
        };
        ranges.push(DateRange::new(cursor, end));
        cursor = end + Duration::days(1);
    }
    ranges
}

/// Sub-ranges of `target` still to run after `last_completed`
pub fn remaining_ranges(
    target: DateRange,
    last_completed: Option<NaiveDate>,
    unit: SplitUnit,
) -> Vec<DateRange> {
    let start = last_completed.map_or(target.start, |done| {
        (done + Duration::days(1)).max(target.start)
    });
    split_range(DateRange::new(start, target.end), unit)
}

/// Progress of the latest checkpoint of a sync type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub checkpoint_id: String,
    pub sync_type: SyncType,
    pub status: CheckpointStatus,
    pub target: DateRange,
    pub last_completed: Option<NaiveDate>,
    pub total_days: i64,
    pub days_completed: i64,
    pub percent_complete: u32,
    pub batches_completed: u32,
    pub total_batches: u32,
    pub appointments_processed: u32,
    pub error_message: Option<String>,
    pub last_run_at: DateTime<Utc>,
    pub resumable: bool,
}

impl BatchStatus {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let total_days = checkpoint.target.days();
        let days_completed = checkpoint
            .last_completed
            .map_or(0, |done| DateRange::new(checkpoint.target.start, done).days())
            .min(total_days);
        let percent_complete = if total_days == 0 {
            0
        } else {
            u32::try_from(days_completed * 100 / total_days).unwrap_or(100)
        };
        Self {
            checkpoint_id: checkpoint.id.clone(),
            sync_type: checkpoint.sync_type,
            status: checkpoint.status,
            target: checkpoint.target,
            last_completed: checkpoint.last_completed,
            total_days,
            days_completed,
            percent_complete,
            batches_completed: checkpoint.batches_completed,
            total_batches: checkpoint.total_batches,
            appointments_processed: checkpoint.appointments_processed,
            error_message: checkpoint.error_message.clone(),
            last_run_at: checkpoint.updated_at,
            resumable: checkpoint.is_active(),
        }
    }
}

/// What one invocation of the runner accomplished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub checkpoint: Checkpoint,
    /// Run logs of the sub-ranges executed by this invocation
    pub runs: Vec<SyncRunLog>,
}

impl BatchOutcome {
    pub fn status(&self) -> CheckpointStatus {
        self.checkpoint.status
    }
}

/// Latest checkpoint progress for `sync_type`
pub fn batch_status(conn: &Connection, sync_type: SyncType) -> Result<Option<BatchStatus>> {
    Ok(SqliteCheckpointRepository::new(conn)
        .find_latest(sync_type)?
        .as_ref()
        .map(BatchStatus::from_checkpoint))
}

/// Mark the active checkpoint of `sync_type` as cancelled
pub fn cancel_batch(conn: &Connection, sync_type: SyncType, now: DateTime<Utc>) -> Result<bool> {
    let checkpoints = SqliteCheckpointRepository::new(conn);
    let Some(mut checkpoint) = checkpoints.find_active(sync_type)? else {
        return Ok(false);
    };
    checkpoint.status = CheckpointStatus::Failed;
    checkpoint.error_message = Some(CANCELLED_MESSAGE.to_string());
    checkpoint.updated_at = now;
    checkpoints.update(&checkpoint)?;
    tracing::info!(checkpoint_id = %checkpoint.id, "Batch sync cancelled");
    Ok(true)
}

pub struct BatchRunner<'a, T> {
    checkpoints: SqliteCheckpointRepository<'a>,
    engine: SyncEngine<'a, T>,
    sync_type: SyncType,
    cancelled: Arc<AtomicBool>,
}

impl<'a, T: Transport> BatchRunner<'a, T> {
    pub fn new(conn: &'a Connection, engine: SyncEngine<'a, T>, sync_type: SyncType) -> Self {
        Self {
            checkpoints: SqliteCheckpointRepository::new(conn),
            engine,
            sync_type,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked before each sub-range; setting it stops the run there
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    const fn unit(&self) -> SplitUnit {
        SplitUnit::for_sync_type(self.sync_type)
    }

    /// Start syncing `target`, continuing an active checkpoint for the same
    /// range instead of starting over
    pub async fn start(&self, target: DateRange) -> Result<BatchOutcome> {
        if target.days() == 0 {
            return Err(Error::InvalidInput(format!(
                "range ends before it starts: {} > {}",
                target.start, target.end
            )));
        }

        let checkpoint = match self.checkpoints.find_active(self.sync_type)? {
            Some(active) if active.target == target => {
                tracing::info!(checkpoint_id = %active.id, "Continuing existing checkpoint");
                active
            }
            Some(active) => {
                return Err(Error::InvalidInput(format!(
                    "a {} sync for {} to {} is still active; resume or cancel it first",
                    self.sync_type, active.target.start, active.target.end
                )));
            }
            None => {
                let now = Utc::now();
                let checkpoint = Checkpoint {
                    id: Uuid::now_v7().to_string(),
                    sync_type: self.sync_type,
                    target,
                    last_completed: None,
                    total_batches: u32::try_from(split_range(target, self.unit()).len())
                        .unwrap_or(u32::MAX),
                    batches_completed: 0,
                    appointments_processed: 0,
                    status: CheckpointStatus::InProgress,
                    error_message: None,
                    created_at: now,
                    updated_at: now,
                };
                self.checkpoints.insert(&checkpoint)?;
                tracing::info!(
                    checkpoint_id = %checkpoint.id,
                    batches = checkpoint.total_batches,
                    "Created checkpoint"
                );
                checkpoint
            }
        };

        self.drive(checkpoint).await
    }

    /// Continue the active checkpoint from the day after its last completed
    /// sub-range
    pub async fn resume(&self) -> Result<BatchOutcome> {
        let checkpoint = self
            .checkpoints
            .find_active(self.sync_type)?
            .ok_or_else(|| Error::NotFound(format!("no resumable {} sync", self.sync_type)))?;
        tracing::info!(
            checkpoint_id = %checkpoint.id,
            last_completed = ?checkpoint.last_completed,
            "Resuming checkpoint"
        );
        self.drive(checkpoint).await
    }

    async fn drive(&self, mut checkpoint: Checkpoint) -> Result<BatchOutcome> {
        checkpoint.status = CheckpointStatus::InProgress;
        checkpoint.error_message = None;
        checkpoint.updated_at = Utc::now();
        self.checkpoints.update(&checkpoint)?;

        let config = self.engine.config();
        let mut runs = Vec::new();
        let ranges = remaining_ranges(checkpoint.target, checkpoint.last_completed, self.unit());

        for (index, range) in ranges.into_iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                checkpoint.status = CheckpointStatus::Failed;
                checkpoint.error_message = Some(CANCELLED_MESSAGE.to_string());
                checkpoint.updated_at = Utc::now();
                self.checkpoints.update(&checkpoint)?;
                tracing::info!(checkpoint_id = %checkpoint.id, "Stopped at cancellation request");
                return Ok(BatchOutcome { checkpoint, runs });
            }
            if index > 0 {
                pause(config.request_delay, config.jitter).await;
            }

            tracing::info!(start = %range.start, end = %range.end, "Syncing sub-range");
            let result = match self.engine.login(Utc::now()).await {
                Ok(_) => {
                    self.engine
                        .run(&SyncOptions::for_range(self.sync_type, range))
                        .await
                }
                Err(e) => Err(e),
            };

            let failure = match result {
                Ok(report) if report.log.status == RunStatus::Failed => {
                    let message = report
                        .log
                        .errors
                        .first()
                        .map_or_else(|| "Sub-range sync failed".to_string(), |e| e.message.clone());
                    runs.push(report.log);
                    Some(message)
                }
                Ok(report) => {
                    checkpoint.last_completed = Some(range.end);
                    checkpoint.batches_completed += 1;
                    checkpoint.appointments_processed += report.log.found;
                    checkpoint.updated_at = Utc::now();
                    self.checkpoints.update(&checkpoint)?;
                    runs.push(report.log);
                    None
                }
                Err(e) => Some(sanitize_error(&e.to_string())),
            };

            if let Some(message) = failure {
                tracing::warn!(
                    checkpoint_id = %checkpoint.id,
                    start = %range.start,
                    "Sub-range failed, pausing: {message}"
                );
                checkpoint.status = CheckpointStatus::Paused;
                checkpoint.error_message = Some(message);
                checkpoint.updated_at = Utc::now();
                self.checkpoints.update(&checkpoint)?;
                return Ok(BatchOutcome { checkpoint, runs });
            }
        }

        checkpoint.status = CheckpointStatus::Completed;
        checkpoint.updated_at = Utc::now();
        self.checkpoints.update(&checkpoint)?;
        tracing::info!(
            checkpoint_id = %checkpoint.id,
            batches = checkpoint.batches_completed,
            appointments = checkpoint.appointments_processed,
            "Batch sync completed"
        );
        Ok(BatchOutcome { checkpoint, runs })
    }
}
