//! Per-run sync log

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChangeType, ErrorCategory, FieldChange, SyncType};
use crate::util::sanitize_error;

/// Errors kept per run log
pub const MAX_RUN_ERRORS: usize = 100;
/// Change details kept per run log
pub const MAX_CHANGE_DETAILS: usize = 500;

text_enum! {
    RunStatus {
        Running => "running",
        Success => "success",
        Partial => "partial",
        Failed => "failed",
    }
}

impl RunStatus {
    /// Final status of a run from its item counters.
    pub const fn from_counts(found: u32, failed: u32) -> Self {
        if failed == 0 {
            Self::Success
        } else if failed < found {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

/// A sanitized, categorized failure recorded against a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub external_id: Option<String>,
    pub message: String,
    pub category: ErrorCategory,
}

impl RunError {
    pub fn new(external_id: Option<String>, message: &str) -> Self {
        let message = sanitize_error(message);
        Self {
            category: ErrorCategory::categorize(&message),
            external_id,
            message,
        }
    }
}

/// What happened to one appointment during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub external_id: String,
    pub pet_name: Option<String>,
    pub action: ChangeType,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
    pub changed_fields: Option<BTreeMap<String, FieldChange>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunLog {
    pub id: String,
    pub sync_type: SyncType,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub found: u32,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub failed: u32,
    pub skipped: u32,
    pub archived: u32,
    pub errors: Vec<RunError>,
    pub change_details: Vec<ChangeDetail>,
    pub duration_ms: Option<i64>,
}

impl SyncRunLog {
    /// A fresh log row in the `running` state
    pub fn start(sync_type: SyncType, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            sync_type,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            found: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            archived: 0,
            errors: Vec::new(),
            change_details: Vec::new(),
            duration_ms: None,
        }
    }

    /// Record an error unless the list is already full
    pub fn push_error(&mut self, error: RunError) {
        if self.errors.len() < MAX_RUN_ERRORS {
            self.errors.push(error);
        }
    }

    /// Record a change detail unless the list is already full
    pub fn push_change(&mut self, detail: ChangeDetail) {
        if self.change_details.len() < MAX_CHANGE_DETAILS {
            self.change_details.push(detail);
        }
    }

    /// Close the log with a final status
    pub fn finish(&mut self, status: RunStatus, completed_at: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some((completed_at - self.started_at).num_milliseconds());
    }
}
