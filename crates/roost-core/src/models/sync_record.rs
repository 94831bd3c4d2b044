//! Raw mirror of each external appointment

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExternalAppointment;

text_enum! {
    /// Outcome of the last change check for a record
    ChangeType {
        Created => "created",
        Updated => "updated",
        Unchanged => "unchanged",
        Archived => "archived",
    }
}

text_enum! {
    /// Whether the record is still present on the booking site
    SyncStatus {
        Active => "active",
        MissingFromSource => "missing_from_source",
        ConfirmedDeleted => "confirmed_deleted",
        Archived => "archived",
    }
}

/// Old and new value of one hashed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Persisted copy of one [`ExternalAppointment`], keyed by external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: String,
    pub external_id: String,
    pub source_url: String,
    pub data: ExternalAppointment,
    pub content_hash: String,
    pub last_change_type: ChangeType,
    pub changed_fields: Option<BTreeMap<String, FieldChange>>,
    pub previous_data: Option<BTreeMap<String, Option<String>>>,
    pub pet_id: Option<String>,
    pub stay_id: Option<String>,
    pub sync_status: SyncStatus,
    pub missing_sync_count: u32,
    pub missing_since: Option<DateTime<Utc>>,
    pub first_synced_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
}

impl SyncRecord {
    pub fn check_in(&self) -> Option<DateTime<Utc>> {
        self.data.check_in
    }

    pub fn check_out(&self) -> Option<DateTime<Utc>> {
        self.data.check_out
    }
}
