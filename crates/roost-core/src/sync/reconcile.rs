//! Archive records that silently vanished from the schedule.
//!
//! A record is only archived after its own page confirms it is gone. Every
//! failure is counted and swallowed so reconciliation never changes the
//! outcome of the run that triggered it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::db::{SqliteSyncRecordRepository, SyncRecordRepository};
use crate::error::Result;
use crate::fetch::{classify_appointment_page, PageFetcher, PageKind, Transport};
use crate::models::{ChangeType, SyncRecord, SyncStatus};
use crate::util::{pause, sanitize_error};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    pub archived: u32,
    /// Unseen records whose page still loads as an appointment
    pub warnings: u32,
    pub errors: u32,
}

pub struct Reconciler<'a, T> {
    records: SqliteSyncRecordRepository<'a>,
    fetcher: PageFetcher<'a, T>,
    config: &'a SyncConfig,
}

impl<'a, T: Transport> Reconciler<'a, T> {
    pub const fn new(conn: &'a Connection, fetcher: PageFetcher<'a, T>, config: &'a SyncConfig) -> Self {
        Self {
            records: SqliteSyncRecordRepository::new(conn),
            fetcher,
            config,
        }
    }

    pub async fn reconcile(
        &self,
        seen: &HashSet<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ReconcileCounts {
        let mut counts = ReconcileCounts::default();

        let candidates: Vec<SyncRecord> = match self.records.list_active_in_window(start, end) {
            Ok(records) => records
                .into_iter()
                .filter(|record| !seen.contains(&record.external_id))
                .collect(),
            Err(e) => {
                tracing::error!("Failed to query reconciliation candidates: {e}");
                counts.errors += 1;
                return counts;
            }
        };

        tracing::info!("Reconciling {} unseen record(s)", candidates.len());

        for (index, candidate) in candidates.into_iter().enumerate() {
            if index > 0 {
                pause(self.config.request_delay, self.config.jitter).await;
            }
            match self.check(candidate, now).await {
                Ok(PageKind::AccessDenied) => counts.archived += 1,
                Ok(PageKind::Valid) => counts.warnings += 1,
                Ok(PageKind::LoginPage) | Err(_) => counts.errors += 1,
            }
        }

        tracing::info!(
            archived = counts.archived,
            warnings = counts.warnings,
            errors = counts.errors,
            "Reconciliation finished"
        );
        counts
    }

    async fn check(&self, mut record: SyncRecord, now: DateTime<Utc>) -> Result<PageKind> {
        let response = match self.fetcher.fetch_raw(&record.source_url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    external_id = %record.external_id,
                    "Reconcile fetch failed: {}",
                    sanitize_error(&e.to_string())
                );
                return Err(e);
            }
        };

        let kind = classify_appointment_page(&response);
        match kind {
            PageKind::AccessDenied => {
                record.sync_status = SyncStatus::Archived;
                record.last_change_type = ChangeType::Archived;
                record.last_changed_at = now;
                if let Err(e) = self.records.update(&record) {
                    tracing::error!(external_id = %record.external_id, "Failed to archive: {e}");
                    return Err(e);
                }
                tracing::info!(
                    external_id = %record.external_id,
                    status = response.status,
                    "Archived record no longer on the booking site"
                );
            }
            PageKind::Valid => {
                tracing::warn!(
                    external_id = %record.external_id,
                    "Appointment page still loads but was not seen during sync, not archiving"
                );
            }
            PageKind::LoginPage => {
                tracing::error!(
                    external_id = %record.external_id,
                    "Login page returned during reconciliation"
                );
            }
        }
        Ok(kind)
    }
}
