//! Sync settings and scheduled-job health

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::RunStatus;

/// The single settings row shared by all entry points
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
    pub session_expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<RunStatus>,
    pub last_sync_message: Option<String>,
    /// Week the schedule scanner will visit next
    pub schedule_cursor_date: Option<NaiveDate>,
}

text_enum! {
    HealthStatus {
        Success => "success",
        Failure => "failure",
    }
}

/// Last outcome of one scheduled entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronHealth {
    pub name: String,
    pub last_ran_at: DateTime<Utc>,
    pub status: HealthStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}
