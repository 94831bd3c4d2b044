//! Short scheduled entry points: keep a session warm, scan the schedule into
//! the queue, and process one queued appointment per call.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::health::record_health_quietly;
use super::mapper::{EntityMapper, MapperOptions};
use super::orchestrator::SyncEngine;
use super::queue::{EnqueueOutcome, SyncQueue};
use crate::auth::SessionStore;
use crate::db::{SettingsRepository, SqliteSettingsRepository};
use crate::error::{Error, Result};
use crate::fetch::{PageFetcher, Transport};
use crate::models::{ChangeType, QueueStatus};
use crate::parse::{fetch_schedule, is_boarding_candidate, parse_appointment_page};
use crate::util::sanitize_error;

pub const AUTH_JOB: &str = "auth";
pub const SCHEDULE_JOB: &str = "schedule";
pub const DETAIL_JOB: &str = "detail";

/// Weeks ahead of today the schedule cursor cycles through
pub const CURSOR_WINDOW_WEEKS: i64 = 8;

/// What a micro entry point did, stored as its health result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicroAction {
    Skipped,
    Refreshed,
    Scanned,
    SessionCleared,
    Idle,
    Created,
    Updated,
    Unchanged,
    Retrying,
    Failed,
    SaveFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicroOutcome {
    pub action: MicroAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanStats>,
}

impl MicroOutcome {
    const fn new(action: MicroAction) -> Self {
        Self {
            action,
            reason: None,
            external_id: None,
            error: None,
            queue_depth: None,
            expires_at: None,
            scan: None,
        }
    }

    fn because(action: MicroAction, reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::new(action)
        }
    }

    fn for_item(action: MicroAction, external_id: &str, queue_depth: usize) -> Self {
        Self {
            external_id: Some(external_id.to_string()),
            queue_depth: Some(queue_depth),
            ..Self::new(action)
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub pages_scanned: u32,
    pub found: u32,
    pub skipped: u32,
    pub queued: u32,
    pub cursor_advanced_to: Option<NaiveDate>,
    pub queue_depth: usize,
}

/// Next cursor: one week on, back to `today` once past the cycle window
pub fn advance_cursor(cursor: NaiveDate, today: NaiveDate) -> NaiveDate {
    let next = cursor + Duration::days(7);
    if next > today + Duration::days(CURSOR_WINDOW_WEEKS * 7) {
        today
    } else {
        next
    }
}

/// Weeks to scan: today's, plus the cursor's when it is not the same week
pub fn weeks_to_scan(cursor: NaiveDate, today: NaiveDate) -> Vec<NaiveDate> {
    if (cursor - today).num_days().abs() < 7 {
        vec![today]
    } else {
        vec![today, cursor]
    }
}

pub struct MicroSync<'a, T> {
    conn: &'a Connection,
    engine: SyncEngine<'a, T>,
}

impl<'a, T: Transport> MicroSync<'a, T> {
    pub const fn new(conn: &'a Connection, engine: SyncEngine<'a, T>) -> Self {
        Self { conn, engine }
    }

    fn finish(&self, job: &str, now: DateTime<Utc>, result: Result<MicroOutcome>) -> Result<MicroOutcome> {
        let health = match &result {
            Ok(outcome) => Ok(outcome.to_json()),
            Err(e) => Err(e.to_string()),
        };
        record_health_quietly(self.conn, job, now, health);
        result
    }

    /// Keep a valid cached session, logging in only when it is missing or expired
    pub async fn refresh_session(&self, now: DateTime<Utc>) -> Result<MicroOutcome> {
        let result = self.refresh_inner(now).await;
        self.finish(AUTH_JOB, now, result)
    }

    async fn refresh_inner(&self, now: DateTime<Utc>) -> Result<MicroOutcome> {
        if let Some(session) = SessionStore::new(self.conn).get(now)? {
            tracing::info!("Cached session still valid, skipping login");
            return Ok(MicroOutcome {
                expires_at: Some(session.expires_at()),
                ..MicroOutcome::because(MicroAction::Skipped, "session_valid")
            });
        }
        let session = self.engine.login(now).await?;
        tracing::info!(expires_at = %session.expires_at(), "Session refreshed");
        Ok(MicroOutcome {
            expires_at: Some(session.expires_at()),
            ..MicroOutcome::new(MicroAction::Refreshed)
        })
    }

    /// Scan today's week and the cursor week, queueing boarding candidates
    pub async fn scan_schedule(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<MicroOutcome> {
        let result = self.scan_inner(today, now).await;
        self.finish(SCHEDULE_JOB, now, result)
    }

    async fn scan_inner(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<MicroOutcome> {
        let store = SessionStore::new(self.conn);
        let Some(session) = store.get(now)? else {
            tracing::info!("No cached session, skipping schedule scan");
            return Ok(MicroOutcome::because(MicroAction::Skipped, "no_session"));
        };

        let settings = SqliteSettingsRepository::new(self.conn);
        let cursor = settings.load()?.schedule_cursor_date.unwrap_or(today);
        let config = self.engine.config();
        let fetcher = PageFetcher::new(self.engine.transport(), &session);
        let queue = SyncQueue::new(self.conn);

        let mut stats = ScanStats::default();
        let mut seen = HashSet::new();
        let mut stubs = Vec::new();
        for week in weeks_to_scan(cursor, today) {
            let url = config.week_url(week);
            let page = match fetch_schedule(&fetcher, config, &url).await {
                Err(Error::SessionExpired) => {
                    tracing::warn!("Session expired during scan, clearing cached session");
                    store.clear()?;
                    return Ok(MicroOutcome::because(MicroAction::SessionCleared, "session_expired"));
                }
                other => other?,
            };
            stats.pages_scanned += 1;
            stubs.extend(
                page.into_iter()
                    .filter(|stub| seen.insert(stub.external_id.clone())),
            );
        }
        stats.found = u32::try_from(stubs.len()).unwrap_or(u32::MAX);

        for stub in &stubs {
            if !is_boarding_candidate(stub) {
                stats.skipped += 1;
                continue;
            }
            let title = stub.title.as_deref().or(stub.pet_name.as_deref());
            match queue.enqueue(&stub.external_id, &stub.url, title, now) {
                Ok(EnqueueOutcome::Queued | EnqueueOutcome::Requeued) => stats.queued += 1,
                Ok(EnqueueOutcome::AlreadyQueued) => {}
                Err(e) => tracing::warn!(external_id = %stub.external_id, "Failed to enqueue: {e}"),
            }
        }

        let next = advance_cursor(cursor, today);
        settings.save_schedule_cursor(next)?;
        if next <= today {
            tracing::info!("Schedule cursor wrapped back to today");
        }
        stats.cursor_advanced_to = Some(next);
        stats.queue_depth = queue.depth()?;

        tracing::info!(
            found = stats.found,
            skipped = stats.skipped,
            queued = stats.queued,
            queue_depth = stats.queue_depth,
            "Schedule scan finished"
        );
        Ok(MicroOutcome {
            scan: Some(stats),
            ..MicroOutcome::new(MicroAction::Scanned)
        })
    }

    /// Process the oldest eligible queue item
    pub async fn process_next(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<MicroOutcome> {
        let result = self.process_inner(today, now).await;
        self.finish(DETAIL_JOB, now, result)
    }

    async fn process_inner(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<MicroOutcome> {
        let queue = SyncQueue::new(self.conn);
        queue.reset_stuck(now)?;

        let Some(item) = queue.dequeue_one(now)? else {
            tracing::debug!("Queue empty");
            return Ok(MicroOutcome::new(MicroAction::Idle));
        };

        let store = SessionStore::new(self.conn);
        let Some(session) = store.get(now)? else {
            queue.release(&item.id)?;
            tracing::info!(external_id = %item.external_id, "No cached session, item released");
            return Ok(MicroOutcome::because(MicroAction::Skipped, "no_session"));
        };

        // One attempt per call; a failure is retried by a later call once
        // the queue's backoff allows it.
        let fetcher = PageFetcher::new(self.engine.transport(), &session);
        let fetched = match fetcher.fetch(&item.source_url).await {
            Ok(html) => parse_appointment_page(&html, &item.source_url, today),
            Err(e) => Err(e),
        };
        let mut appointment = match fetched {
            Ok(appointment) => appointment,
            Err(Error::SessionExpired) => {
                store.clear()?;
                queue.release(&item.id)?;
                tracing::warn!(external_id = %item.external_id, "Session expired, item released");
                return Ok(MicroOutcome::because(MicroAction::SessionCleared, "session_expired"));
            }
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                tracing::warn!(external_id = %item.external_id, "Detail fetch failed: {message}");
                let state = queue.mark_failed(&item.id, &message, now)?;
                let action = if state.status == QueueStatus::Failed {
                    MicroAction::Failed
                } else {
                    MicroAction::Retrying
                };
                return Ok(MicroOutcome {
                    error: Some(message),
                    ..MicroOutcome::for_item(action, &item.external_id, queue.depth()?)
                });
            }
        };

        if appointment.pet_name.is_none() {
            appointment.pet_name = item.title.clone();
        }

        let mapper = EntityMapper::new(
            self.conn,
            MapperOptions {
                overwrite_manual: self.engine.config().overwrite_manual,
                force_update: false,
            },
        );
        match mapper.save_appointment(&appointment, now) {
            Ok(outcome) => {
                queue.mark_done(&item.id, now)?;
                let action = match outcome.action() {
                    ChangeType::Created => MicroAction::Created,
                    ChangeType::Updated => MicroAction::Updated,
                    _ => MicroAction::Unchanged,
                };
                tracing::info!(external_id = %item.external_id, ?action, "Saved queued appointment");
                Ok(MicroOutcome::for_item(action, &item.external_id, queue.depth()?))
            }
            Err(e) => {
                let message = sanitize_error(&e.to_string());
                tracing::warn!(external_id = %item.external_id, "Save failed: {message}");
                queue.mark_failed(&item.id, &message, now)?;
                Ok(MicroOutcome {
                    error: Some(message),
                    ..MicroOutcome::for_item(MicroAction::SaveFailed, &item.external_id, queue.depth()?)
                })
            }
        }
    }
}
