//! Durable work queue item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

text_enum! {
    QueueStatus {
        Pending => "pending",
        Processing => "processing",
        Done => "done",
        Failed => "failed",
    }
}

/// One appointment waiting for its detail page to be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub external_id: String,
    pub source_url: String,
    pub title: Option<String>,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}
