//! Durable work queue for one-item-per-invocation processing.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::{QueueRepository, SqliteQueueRepository};
use crate::error::{Error, Result};
use crate::models::{QueueItem, QueueStatus};

/// Failures after which an item stops being retried
pub const MAX_RETRIES: u32 = 3;
/// Backoff step; the wait before retry `n` is `n` steps
pub const RETRY_INTERVAL_MINUTES: i64 = 5;
/// Age after which a `processing` item is considered abandoned
pub const STUCK_AFTER_MINUTES: i64 = 10;

/// State an item moves to after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureState {
    pub status: QueueStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Pure failure transition: linear backoff until [`MAX_RETRIES`]
pub fn next_failure_state(retry_count: u32, now: DateTime<Utc>) -> FailureState {
    let retry_count = retry_count + 1;
    if retry_count >= MAX_RETRIES {
        FailureState {
            status: QueueStatus::Failed,
            retry_count,
            next_retry_at: None,
        }
    } else {
        FailureState {
            status: QueueStatus::Pending,
            retry_count,
            next_retry_at: Some(
                now + Duration::minutes(RETRY_INTERVAL_MINUTES * i64::from(retry_count)),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Already pending, processing or done
    AlreadyQueued,
    /// A permanently failed item was put back to pending
    Requeued,
}

pub struct SyncQueue<'a> {
    items: SqliteQueueRepository<'a>,
}

impl<'a> SyncQueue<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            items: SqliteQueueRepository::new(conn),
        }
    }

    pub fn enqueue(
        &self,
        external_id: &str,
        source_url: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome> {
        if let Some(mut existing) = self.items.get_by_external_id(external_id)? {
            if existing.status != QueueStatus::Failed {
                tracing::debug!(external_id, status = %existing.status, "Already queued");
                return Ok(EnqueueOutcome::AlreadyQueued);
            }
            existing.status = QueueStatus::Pending;
            existing.retry_count = 0;
            existing.last_error = None;
            existing.next_retry_at = None;
            existing.queued_at = now;
            self.items.update(&existing)?;
            tracing::info!(external_id, "Re-queued failed item");
            return Ok(EnqueueOutcome::Requeued);
        }

        self.items.insert(&QueueItem {
            id: uuid::Uuid::now_v7().to_string(),
            external_id: external_id.to_string(),
            source_url: source_url.to_string(),
            title: title.map(str::to_string),
            status: QueueStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            queued_at: now,
            processing_started_at: None,
            processed_at: None,
        })?;
        tracing::debug!(external_id, "Queued");
        Ok(EnqueueOutcome::Queued)
    }

    /// Claim the oldest eligible item, or `None` if nothing is ready or
    /// another worker won the claim
    pub fn dequeue_one(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>> {
        let Some(mut item) = self.items.list_eligible(now, 1)?.into_iter().next() else {
            return Ok(None);
        };
        if !self.items.claim(&item.id, now)? {
            tracing::debug!(external_id = %item.external_id, "Item claimed elsewhere");
            return Ok(None);
        }
        item.status = QueueStatus::Processing;
        item.processing_started_at = Some(now);
        Ok(Some(item))
    }

    fn load(&self, id: &str) -> Result<QueueItem> {
        self.items
            .get(id)?
            .ok_or_else(|| Error::NotFound(format!("queue item {id}")))
    }

    pub fn mark_done(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut item = self.load(id)?;
        item.status = QueueStatus::Done;
        item.processed_at = Some(now);
        self.items.update(&item)?;
        tracing::debug!(external_id = %item.external_id, "Marked done");
        Ok(())
    }

    /// Record a failed attempt and return the state the item moved to
    pub fn mark_failed(&self, id: &str, message: &str, now: DateTime<Utc>) -> Result<FailureState> {
        let mut item = self.load(id)?;
        let next = next_failure_state(item.retry_count, now);

        item.status = next.status;
        item.retry_count = next.retry_count;
        item.last_error = Some(message.to_string());
        item.next_retry_at = next.next_retry_at;
        if next.status == QueueStatus::Failed {
            item.processed_at = Some(now);
            tracing::error!(
                external_id = %item.external_id,
                retries = next.retry_count,
                "Queue item permanently failed"
            );
        } else {
            tracing::warn!(
                external_id = %item.external_id,
                retry = next.retry_count,
                "Queue item scheduled for retry"
            );
        }
        self.items.update(&item)?;
        Ok(next)
    }

    /// Put a claimed item back to pending without counting a retry
    pub fn release(&self, id: &str) -> Result<()> {
        let mut item = self.load(id)?;
        item.status = QueueStatus::Pending;
        item.processing_started_at = None;
        self.items.update(&item)
    }

    pub fn reset_stuck(&self, now: DateTime<Utc>) -> Result<usize> {
        let reset = self
            .items
            .reset_stuck(now - Duration::minutes(STUCK_AFTER_MINUTES))?;
        if reset > 0 {
            tracing::warn!("Reset {reset} stuck queue item(s) to pending");
        }
        Ok(reset)
    }

    /// Pending plus processing items
    pub fn depth(&self) -> Result<usize> {
        Ok(self.items.count_by_status(QueueStatus::Pending)?
            + self.items.count_by_status(QueueStatus::Processing)?)
    }

    pub fn list(&self, status: QueueStatus, limit: usize) -> Result<Vec<QueueItem>> {
        self.items.list_by_status(status, limit)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::Database;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn failure_backoff_is_linear_then_permanent() {
        let now = Utc::now();

        let first = next_failure_state(0, now);
        assert_eq!(first.status, QueueStatus::Pending);
        assert_eq!(first.next_retry_at, Some(now + Duration::minutes(5)));

        let second = next_failure_state(1, now);
        assert_eq!(second.retry_count, 2);
        assert_eq!(second.next_retry_at, Some(now + Duration::minutes(10)));

        let third = next_failure_state(2, now);
        assert_eq!(
            third,
            FailureState {
                status: QueueStatus::Failed,
                retry_count: 3,
                next_retry_at: None,
            }
        );
    }

    #[test]
    fn enqueue_is_idempotent_and_requeues_failed_items() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let now = Utc::now();

        assert_eq!(
            queue.enqueue("A1", "https://site.test/schedule/a/A1/1", Some("Boarding"), now).unwrap(),
            EnqueueOutcome::Queued
        );
        assert_eq!(
            queue.enqueue("A1", "https://site.test/schedule/a/A1/1", None, now).unwrap(),
            EnqueueOutcome::AlreadyQueued
        );

        let item = queue.dequeue_one(now).unwrap().unwrap();
        for _ in 0..MAX_RETRIES {
            queue.mark_failed(&item.id, "HTTP 500", now).unwrap();
        }
        assert_eq!(queue.list(QueueStatus::Failed, 10).unwrap().len(), 1);

        assert_eq!(
            queue.enqueue("A1", "https://site.test/schedule/a/A1/1", None, now).unwrap(),
            EnqueueOutcome::Requeued
        );
        let requeued = queue.list(QueueStatus::Pending, 10).unwrap();
        assert_eq!(requeued[0].retry_count, 0);
        assert_eq!(requeued[0].last_error, None);
    }

    #[test]
    fn dequeue_claims_oldest_eligible_item() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let now = Utc::now();
        queue.enqueue("OLD", "u1", None, now - Duration::minutes(2)).unwrap();
        queue.enqueue("NEW", "u2", None, now).unwrap();

        let item = queue.dequeue_one(now).unwrap().unwrap();
        assert_eq!(item.external_id, "OLD");
        assert_eq!(item.status, QueueStatus::Processing);
        assert_eq!(queue.depth().unwrap(), 2);

        let next = queue.dequeue_one(now).unwrap().unwrap();
        assert_eq!(next.external_id, "NEW");
        assert_eq!(queue.dequeue_one(now).unwrap(), None);
    }

    #[test]
    fn retry_waits_until_next_retry_at() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let now = Utc::now();
        queue.enqueue("A1", "u1", None, now).unwrap();
        let item = queue.dequeue_one(now).unwrap().unwrap();

        let state = queue.mark_failed(&item.id, "timeout", now).unwrap();
        assert_eq!(state.status, QueueStatus::Pending);

        assert_eq!(queue.dequeue_one(now + Duration::minutes(4)).unwrap(), None);
        assert!(queue.dequeue_one(now + Duration::minutes(5)).unwrap().is_some());
    }

    #[test]
    fn release_keeps_retry_state() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let now = Utc::now();
        queue.enqueue("A1", "u1", None, now).unwrap();
        let item = queue.dequeue_one(now).unwrap().unwrap();

        queue.release(&item.id).unwrap();

        let released = SqliteQueueRepository::new(db.connection()).get(&item.id).unwrap().unwrap();
        assert_eq!(released.status, QueueStatus::Pending);
        assert_eq!(released.retry_count, 0);
        assert_eq!(released.processing_started_at, None);
    }

    #[test]
    fn stuck_items_are_reset_after_ten_minutes() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let started = Utc::now() - Duration::minutes(15);
        queue.enqueue("A1", "u1", None, started).unwrap();
        queue.dequeue_one(started).unwrap().unwrap();

        assert_eq!(queue.reset_stuck(started + Duration::minutes(5)).unwrap(), 0);
        assert_eq!(queue.reset_stuck(Utc::now()).unwrap(), 1);
        assert_eq!(queue.list(QueueStatus::Pending, 10).unwrap().len(), 1);
    }

    #[test]
    fn done_items_are_not_counted_in_depth() {
        let db = setup();
        let queue = SyncQueue::new(db.connection());
        let now = Utc::now();
        queue.enqueue("A1", "u1", None, now).unwrap();
        let item = queue.dequeue_one(now).unwrap().unwrap();

        queue.mark_done(&item.id, now).unwrap();

        assert_eq!(queue.depth().unwrap(), 0);
        assert_eq!(
            queue.enqueue("A1", "u1", None, now).unwrap(),
            EnqueueOutcome::AlreadyQueued
        );
    }
}
