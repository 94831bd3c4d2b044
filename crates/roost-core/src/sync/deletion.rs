//! Missing-streak deletion detection for full and historical runs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{SqliteStayRepository, SqliteSyncRecordRepository, StayRepository, SyncRecordRepository};
use crate::error::Result;
use crate::models::SyncStatus;

/// Consecutive misses before a record is confirmed deleted
pub const DELETION_THRESHOLD: u32 = 3;
/// Reason recorded on stays cancelled by deletion detection
pub const CANCELLATION_REASON: &str = "Removed from external system";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCounts {
    pub restored: u32,
    pub marked_missing: u32,
    pub confirmed_deleted: u32,
    pub cancelled_stays: u32,
}

pub struct DeletionDetector<'a> {
    records: SqliteSyncRecordRepository<'a>,
    stays: SqliteStayRepository<'a>,
}

impl<'a> DeletionDetector<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            records: SqliteSyncRecordRepository::new(conn),
            stays: SqliteStayRepository::new(conn),
        }
    }

    /// Compare the ids fetched for `[start, end)` with what the store expects
    pub fn detect(
        &self,
        seen: &HashSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DeletionCounts> {
        let mut counts = DeletionCounts::default();

        for mut record in self.records.list_by_status(SyncStatus::MissingFromSource)? {
            if seen.contains(&record.external_id) {
                record.sync_status = SyncStatus::Active;
                record.missing_sync_count = 0;
                record.missing_since = None;
                self.records.update(&record)?;
                counts.restored += 1;
            }
        }
        if counts.restored > 0 {
            tracing::info!("{} record(s) reappeared and were restored", counts.restored);
        }

        for mut record in self.records.list_expected_between(start, end)? {
            if seen.contains(&record.external_id) {
                continue;
            }
            record.missing_sync_count += 1;
            record.missing_since.get_or_insert(now);

            if record.missing_sync_count >= DELETION_THRESHOLD {
                record.sync_status = SyncStatus::ConfirmedDeleted;
                counts.confirmed_deleted += 1;
                tracing::info!(
                    external_id = %record.external_id,
                    misses = record.missing_sync_count,
                    "Record confirmed deleted"
                );
            } else {
                record.sync_status = SyncStatus::MissingFromSource;
                counts.marked_missing += 1;
                tracing::debug!(
                    external_id = %record.external_id,
                    "Record missing ({}/{DELETION_THRESHOLD})",
                    record.missing_sync_count
                );
            }
            self.records.update(&record)?;
        }

        let mut stay_ids = Vec::new();
        for record in self.records.list_by_status(SyncStatus::ConfirmedDeleted)? {
            stay_ids.extend(record.stay_id);
            stay_ids.extend(
                self.stays
                    .list_secondaries(&record.external_id)?
                    .into_iter()
                    .filter(|stay| !stay.is_cancelled())
                    .map(|stay| stay.id),
            );
        }
        let cancelled = self.stays.cancel(&stay_ids, CANCELLATION_REASON, now)?;
        counts.cancelled_stays = u32::try_from(cancelled).unwrap_or(u32::MAX);
        if cancelled > 0 {
            tracing::info!("Cancelled {cancelled} stay(s) removed from the booking site");
        }

        Ok(counts)
    }
}
