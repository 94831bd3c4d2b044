//! Resumable progress for long multi-range syncs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    /// Kind of sync run
    SyncType {
        /// Current window, reconciled by refetching unseen records
        Incremental => "incremental",
        /// Explicit window with missing-streak deletion detection
        Full => "full",
        /// Day-by-day resumable range
        Batch => "batch",
        /// Month-by-month resumable backfill
        Historical => "historical",
        /// One queue item per invocation
        Micro => "micro",
    }
}

text_enum! {
    CheckpointStatus {
        InProgress => "in_progress",
        Paused => "paused",
        Completed => "completed",
        Failed => "failed",
    }
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub const fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of calendar days covered, zero for an inverted range
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days().max(-1) + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub sync_type: SyncType,
    pub target: DateRange,
    /// Last date whose sub-range finished successfully
    pub last_completed: Option<NaiveDate>,
    pub total_batches: u32,
    pub batches_completed: u32,
    pub appointments_processed: u32,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub const fn is_active(&self) -> bool {
        matches!(
            self.status,
            CheckpointStatus::InProgress | CheckpointStatus::Paused
        )
    }
}
