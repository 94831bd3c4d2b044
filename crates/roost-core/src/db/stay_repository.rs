//! Stay repository implementation

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{get_enum, get_opt_time, get_time, millis, opt_millis};
use crate::error::{Error, Result};
use crate::models::{NewStay, Stay};

const STAY_COLUMNS: &str = "id, pet_id, arrival_at, departure_at, external_id, source, billed_amount, night_rate, day_rate, cancelled_at, cancellation_reason, created_at, updated_at";

/// Trait for stay storage operations
pub trait StayRepository {
    /// Insert a new stay
    fn create(&self, stay: &NewStay, now: DateTime<Utc>) -> Result<Stay>;

    /// Get a stay by ID
    fn get(&self, id: &str) -> Result<Option<Stay>>;

    /// Find the stay linked to a booking-site id
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Stay>>;

    /// Stays created for the extra pets of a multi-pet appointment
    /// (`{external_id}_p1`, `{external_id}_p2`, ...)
    fn list_secondaries(&self, external_id: &str) -> Result<Vec<Stay>>;

    /// First uncancelled stay for `pet_id` whose dates overlap `[arrival, departure]`
    fn find_overlapping(
        &self,
        pet_id: &str,
        arrival: DateTime<Utc>,
        departure: DateTime<Utc>,
    ) -> Result<Option<Stay>>;

    /// Persist every mutable field of an existing stay
    fn update(&self, stay: &Stay) -> Result<()>;

    /// Cancel every uncancelled stay in `ids`; returns how many changed
    fn cancel(&self, ids: &[String], reason: &str, now: DateTime<Utc>) -> Result<usize>;

    /// All stays for a pet, newest arrival first
    fn list_for_pet(&self, pet_id: &str) -> Result<Vec<Stay>>;
}

/// `SQLite` implementation of `StayRepository`
pub struct SqliteStayRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStayRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_stay(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stay> {
        Ok(Stay {
            id: row.get(0)?,
            pet_id: row.get(1)?,
            arrival: get_time(row, 2)?,
            departure: get_time(row, 3)?,
            external_id: row.get(4)?,
            source: get_enum(row, 5)?,
            billed_amount: row.get(6)?,
            night_rate: row.get(7)?,
            day_rate: row.get(8)?,
            cancelled_at: get_opt_time(row, 9)?,
            cancellation_reason: row.get(10)?,
            created_at: get_time(row, 11)?,
            updated_at: get_time(row, 12)?,
        })
    }
}

impl StayRepository for SqliteStayRepository<'_> {
    fn create(&self, stay: &NewStay, now: DateTime<Utc>) -> Result<Stay> {
        let created = Stay {
            id: Uuid::now_v7().to_string(),
            pet_id: stay.pet_id.clone(),
            arrival: stay.arrival,
            departure: stay.departure,
            external_id: stay.external_id.clone(),
            source: stay.source,
            billed_amount: stay.billed_amount,
            night_rate: stay.night_rate,
            day_rate: stay.day_rate,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.conn.execute(
            &format!("INSERT INTO stays ({STAY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                created.id,
                created.pet_id,
                millis(created.arrival),
                millis(created.departure),
                created.external_id,
                created.source.as_str(),
                created.billed_amount,
                created.night_rate,
                created.day_rate,
                opt_millis(created.cancelled_at),
                created.cancellation_reason,
                millis(created.created_at),
                millis(created.updated_at),
            ],
        )?;

        Ok(created)
    }

    fn get(&self, id: &str) -> Result<Option<Stay>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {STAY_COLUMNS} FROM stays WHERE id = ?"),
                params![id],
                Self::parse_stay,
            )
            .optional()?)
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Stay>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {STAY_COLUMNS} FROM stays WHERE external_id = ?"),
                params![external_id],
                Self::parse_stay,
            )
            .optional()?)
    }

    fn list_secondaries(&self, external_id: &str) -> Result<Vec<Stay>> {
        let prefix = format!("{external_id}_p");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STAY_COLUMNS} FROM stays
             WHERE substr(external_id, 1, length(?1)) = ?1
             ORDER BY external_id"
        ))?;

        let stays = stmt
            .query_map(params![prefix], Self::parse_stay)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(stays
            .into_iter()
            .filter(|stay| {
                stay.external_id
                    .as_deref()
                    .and_then(|id| id.strip_prefix(&prefix))
                    .is_some_and(|index| index.parse::<u32>().is_ok())
            })
            .collect())
    }

    fn find_overlapping(
        &self,
        pet_id: &str,
        arrival: DateTime<Utc>,
        departure: DateTime<Utc>,
    ) -> Result<Option<Stay>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {STAY_COLUMNS} FROM stays
                     WHERE pet_id = ? AND arrival_at <= ? AND departure_at >= ? AND cancelled_at IS NULL
                     ORDER BY arrival_at
                     LIMIT 1"
                ),
                params![pet_id, millis(departure), millis(arrival)],
                Self::parse_stay,
            )
            .optional()?)
    }

    fn update(&self, stay: &Stay) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE stays
             SET pet_id = ?, arrival_at = ?, departure_at = ?, external_id = ?, source = ?,
                 billed_amount = ?, night_rate = ?, day_rate = ?, cancelled_at = ?,
                 cancellation_reason = ?, updated_at = ?
             WHERE id = ?",
            params![
                stay.pet_id,
                millis(stay.arrival),
                millis(stay.departure),
                stay.external_id,
                stay.source.as_str(),
                stay.billed_amount,
                stay.night_rate,
                stay.day_rate,
                opt_millis(stay.cancelled_at),
                stay.cancellation_reason,
                millis(stay.updated_at),
                stay.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("stay {}", stay.id)));
        }
        Ok(())
    }

    fn cancel(&self, ids: &[String], reason: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut cancelled = 0;
        for id in ids {
            cancelled += self.conn.execute(
                "UPDATE stays SET cancelled_at = ?, cancellation_reason = ?, updated_at = ?
                 WHERE id = ? AND cancelled_at IS NULL",
                params![millis(now), reason, millis(now), id],
            )?;
        }
        Ok(cancelled)
    }

    fn list_for_pet(&self, pet_id: &str) -> Result<Vec<Stay>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STAY_COLUMNS} FROM stays WHERE pet_id = ? ORDER BY arrival_at DESC"
        ))?;

        let stays = stmt
            .query_map(params![pet_id], Self::parse_stay)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(stays)
    }
}
