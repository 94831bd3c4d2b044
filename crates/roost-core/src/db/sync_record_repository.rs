//! Sync record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{get_enum, get_json, get_opt_json, get_opt_time, get_time, millis, opt_millis};
use crate::error::{Error, Result};
use crate::models::{SyncRecord, SyncStatus};

const RECORD_COLUMNS: &str = "id, external_id, source_url, check_in_at, check_out_at, status, pet_name, appointment_total, raw_data, content_hash, last_change_type, changed_fields, previous_data, pet_id, stay_id, sync_status, missing_sync_count, missing_since, first_synced_at, last_synced_at, last_changed_at";

/// Trait for raw sync record storage
pub trait SyncRecordRepository {
    fn get_by_external_id(&self, external_id: &str) -> Result<Option<SyncRecord>>;

    fn insert(&self, record: &SyncRecord) -> Result<()>;

    /// Persist every mutable field of an existing record
    fn update(&self, record: &SyncRecord) -> Result<()>;

    /// Active records overlapping a window: `check_out >= start` and
    /// `check_in < end`, each bound applied only when given
    fn list_active_in_window(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>>;

    /// Records checking in within `[start, end)` that are neither
    /// confirmed deleted nor archived
    fn list_expected_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SyncRecord>>;

    fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SyncRecord>>;

    /// Most recently synced records first
    fn list_recent(&self, limit: usize) -> Result<Vec<SyncRecord>>;
}

/// `SQLite` implementation of `SyncRecordRepository`
pub struct SqliteSyncRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRecord> {
        Ok(SyncRecord {
            id: row.get(0)?,
            external_id: row.get(1)?,
            source_url: row.get(2)?,
            data: get_json(row, 8)?,
            content_hash: row.get(9)?,
            last_change_type: get_enum(row, 10)?,
            changed_fields: get_opt_json(row, 11)?,
            previous_data: get_opt_json(row, 12)?,
            pet_id: row.get(13)?,
            stay_id: row.get(14)?,
            sync_status: get_enum(row, 15)?,
            missing_sync_count: row.get(16)?,
            missing_since: get_opt_time(row, 17)?,
            first_synced_at: get_time(row, 18)?,
            last_synced_at: get_time(row, 19)?,
            last_changed_at: get_time(row, 20)?,
        })
    }

    fn select(&self, filter: &str, params: impl rusqlite::Params) -> Result<Vec<SyncRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM sync_records {filter}"))?;

        let records = stmt
            .query_map(params, Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }
}

fn optional_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Error::from)
}

impl SyncRecordRepository for SqliteSyncRecordRepository<'_> {
    fn get_by_external_id(&self, external_id: &str) -> Result<Option<SyncRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM sync_records WHERE external_id = ?"),
                params![external_id],
                Self::parse_record,
            )
            .optional()?)
    }

    fn insert(&self, record: &SyncRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO sync_records ({RECORD_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                record.id,
                record.external_id,
                record.source_url,
                opt_millis(record.data.check_in),
                opt_millis(record.data.check_out),
                record.data.status,
                record.data.pet_name,
                record.data.pricing.as_ref().map(|pricing| pricing.total),
                serde_json::to_string(&record.data)?,
                record.content_hash,
                record.last_change_type.as_str(),
                optional_json(record.changed_fields.as_ref())?,
                optional_json(record.previous_data.as_ref())?,
                record.pet_id,
                record.stay_id,
                record.sync_status.as_str(),
                record.missing_sync_count,
                opt_millis(record.missing_since),
                millis(record.first_synced_at),
                millis(record.last_synced_at),
                millis(record.last_changed_at),
            ],
        )?;
        Ok(())
    }

    fn update(&self, record: &SyncRecord) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE sync_records
             SET source_url = ?, check_in_at = ?, check_out_at = ?, status = ?, pet_name = ?,
                 appointment_total = ?, raw_data = ?, content_hash = ?, last_change_type = ?,
                 changed_fields = ?, previous_data = ?, pet_id = ?, stay_id = ?, sync_status = ?,
                 missing_sync_count = ?, missing_since = ?, last_synced_at = ?, last_changed_at = ?
             WHERE id = ?",
            params![
                record.source_url,
                opt_millis(record.data.check_in),
                opt_millis(record.data.check_out),
                record.data.status,
                record.data.pet_name,
                record.data.pricing.as_ref().map(|pricing| pricing.total),
                serde_json::to_string(&record.data)?,
                record.content_hash,
                record.last_change_type.as_str(),
                optional_json(record.changed_fields.as_ref())?,
                optional_json(record.previous_data.as_ref())?,
                record.pet_id,
                record.stay_id,
                record.sync_status.as_str(),
                record.missing_sync_count,
                opt_millis(record.missing_since),
                millis(record.last_synced_at),
                millis(record.last_changed_at),
                record.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("sync record {}", record.external_id)));
        }
        Ok(())
    }

    fn list_active_in_window(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>> {
        self.select(
            "WHERE sync_status = 'active'
               AND (?1 IS NULL OR check_out_at >= ?1)
               AND (?2 IS NULL OR check_in_at < ?2)
             ORDER BY check_in_at",
            params![opt_millis(start), opt_millis(end)],
        )
    }

    fn list_expected_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SyncRecord>> {
        self.select(
            "WHERE check_in_at >= ? AND check_in_at < ?
               AND sync_status NOT IN ('confirmed_deleted', 'archived')
             ORDER BY check_in_at",
            params![millis(start), millis(end)],
        )
    }

    fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SyncRecord>> {
        self.select(
            "WHERE sync_status = ? ORDER BY check_in_at",
            params![status.as_str()],
        )
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<SyncRecord>> {
        self.select(
            "ORDER BY last_synced_at DESC LIMIT ?",
            params![limit as i64],
        )
    }
}
