//! Content hashing and change classification for synced appointments.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
#[cfg(feature = "sha256")]
use sha2::{Digest, Sha256};

use crate::models::{ChangeType, ExternalAppointment, FieldChange, SyncRecord};

type FieldReader = fn(&ExternalAppointment) -> Option<String>;

fn instant(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|value| value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Fields whose change marks an appointment as updated, in hash order
pub const HASH_FIELDS: &[(&str, FieldReader)] = &[
    ("check_in", |a| instant(a.check_in)),
    ("check_out", |a| instant(a.check_out)),
    ("status", |a| a.status.clone()),
    ("assigned_staff", |a| a.assigned_staff.clone()),
    ("pet_name", |a| a.pet_name.clone()),
    ("client_name", |a| a.client_name.clone()),
    ("client_phone", |a| a.client_phone.clone()),
    ("special_notes", |a| a.special_notes.clone()),
];

fn hash_input(appointment: &ExternalAppointment) -> String {
    HASH_FIELDS
        .iter()
        .map(|(_, read)| read(appointment).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("|")
}

/// 32-bit DJB2 over UTF-16 units, zero-padded to 64 hex characters
#[cfg(any(test, not(feature = "sha256")))]
fn djb2_hex(input: &str) -> String {
    let hash = input.encode_utf16().fold(5381i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(i32::from(unit))
    });
    format!("{:064x}", hash.unsigned_abs())
}

/// 64 hex characters identifying the hashed field subset.
///
/// SHA-256 by default; builds without the `sha256` feature use DJB2.
pub fn content_hash(appointment: &ExternalAppointment) -> String {
    let input = hash_input(appointment);
    #[cfg(feature = "sha256")]
    {
        hex::encode(Sha256::digest(input.as_bytes()))
    }
    #[cfg(not(feature = "sha256"))]
    {
        djb2_hex(&input)
    }
}

/// Outcome of comparing an incoming appointment with its stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub change_type: ChangeType,
    pub hash: String,
    pub changed_fields: Option<BTreeMap<String, FieldChange>>,
    pub previous_data: Option<BTreeMap<String, Option<String>>>,
}

/// Field-by-field differences over [`HASH_FIELDS`]
pub fn changed_fields(
    existing: &ExternalAppointment,
    incoming: &ExternalAppointment,
) -> BTreeMap<String, FieldChange> {
    HASH_FIELDS
        .iter()
        .filter_map(|(name, read)| {
            let old = read(existing);
            let new = read(incoming);
            (old.as_deref().unwrap_or_default() != new.as_deref().unwrap_or_default())
                .then(|| ((*name).to_string(), FieldChange { old, new }))
        })
        .collect()
}

/// Classify `incoming` against the stored record, if any
pub fn detect_changes(existing: Option<&SyncRecord>, incoming: &ExternalAppointment) -> ChangeSet {
    let hash = content_hash(incoming);

    let Some(existing) = existing else {
        return ChangeSet {
            change_type: ChangeType::Created,
            hash,
            changed_fields: None,
            previous_data: None,
        };
    };

    if existing.content_hash == hash {
        return ChangeSet {
            change_type: ChangeType::Unchanged,
            hash,
            changed_fields: None,
            previous_data: None,
        };
    }

    let changes = changed_fields(&existing.data, incoming);
    let previous_data = (!changes.is_empty()).then(|| {
        changes
            .iter()
            .map(|(name, change)| (name.clone(), change.old.clone()))
            .collect()
    });

    ChangeSet {
        change_type: ChangeType::Updated,
        hash,
        changed_fields: (!changes.is_empty()).then_some(changes),
        previous_data,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{Pricing, SyncStatus};

    fn appointment() -> ExternalAppointment {
        ExternalAppointment {
            external_id: "ABC123".into(),
            check_in: Some("2025-12-21T17:00:00Z".parse().unwrap()),
            check_out: Some("2025-12-23T10:00:00Z".parse().unwrap()),
            status: Some("Scheduled".into()),
            pet_name: Some("Luna".into()),
            client_name: Some("John Smith".into()),
            ..ExternalAppointment::default()
        }
    }

    fn record(data: ExternalAppointment) -> SyncRecord {
        let now = Utc::now();
        SyncRecord {
            id: "r1".into(),
            external_id: data.external_id.clone(),
            source_url: String::new(),
            content_hash: content_hash(&data),
            data,
            last_change_type: ChangeType::Created,
            changed_fields: None,
            previous_data: None,
            pet_id: None,
            stay_id: None,
            sync_status: SyncStatus::Active,
            missing_sync_count: 0,
            missing_since: None,
            first_synced_at: now,
            last_synced_at: now,
            last_changed_at: now,
        }
    }

    #[test]
    fn hash_input_joins_fields_with_millisecond_instants() {
        assert_eq!(
            hash_input(&appointment()),
            "2025-12-21T17:00:00.000Z|2025-12-23T10:00:00.000Z|Scheduled||Luna|John Smith||"
        );
    }

    #[test]
    fn djb2_fallback_is_padded_to_the_same_width() {
        let hash = djb2_hex(&hash_input(&appointment()));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(djb2_hex(""), format!("{:064x}", 5381));
    }

    #[cfg(feature = "sha256")]
    #[test]
    fn default_hash_is_sha256_hex() {
        let hash = content_hash(&appointment());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, djb2_hex(&hash_input(&appointment())));
    }

    #[test]
    fn new_record_is_created() {
        let changes = detect_changes(None, &appointment());
        assert_eq!(changes.change_type, ChangeType::Created);
        assert_eq!(changes.changed_fields, None);
    }

    #[test]
    fn non_hashed_fields_do_not_count_as_changes() {
        let stored = record(appointment());
        let mut incoming = appointment();
        incoming.pet_breed = Some("Golden Retriever".into());
        incoming.pricing = Some(Pricing {
            total: 550.0,
            line_items: Vec::new(),
            per_pet_rates: None,
        });

        let changes = detect_changes(Some(&stored), &incoming);
        assert_eq!(changes.change_type, ChangeType::Unchanged);
    }

    #[test]
    fn updated_record_reports_diff_and_previous_values() {
        let stored = record(appointment());
        let mut incoming = appointment();
        incoming.status = Some("Cancelled".into());
        incoming.special_notes = Some("Bring blanket".into());

        let changes = detect_changes(Some(&stored), &incoming);

        assert_eq!(changes.change_type, ChangeType::Updated);
        let fields = changes.changed_fields.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(
            fields["status"],
            FieldChange {
                old: Some("Scheduled".into()),
                new: Some("Cancelled".into()),
            }
        );
        let previous = changes.previous_data.unwrap();
        assert_eq!(previous["special_notes"], None);
    }
}
