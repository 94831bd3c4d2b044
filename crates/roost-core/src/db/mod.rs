//! Database layer for Roost

mod checkpoint_repository;
mod connection;
mod health_repository;
mod migrations;
mod pet_repository;
mod queue_repository;
mod run_log_repository;
mod settings_repository;
mod stay_repository;
mod sync_record_repository;

pub use checkpoint_repository::{CheckpointRepository, SqliteCheckpointRepository};
pub use connection::Database;
pub use health_repository::{HealthRepository, SqliteHealthRepository};
pub use pet_repository::{PetRepository, SqlitePetRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use run_log_repository::{RunLogRepository, SqliteRunLogRepository};
pub use settings_repository::{SettingsRepository, SqliteSettingsRepository};
pub use stay_repository::{SqliteStayRepository, StayRepository};
pub use sync_record_repository::{SqliteSyncRecordRepository, SyncRecordRepository};

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;

use crate::util::from_millis;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

fn opt_millis(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(millis)
}

fn date_text(value: NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

fn conversion_error(
    idx: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
}

fn get_time(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(from_millis(row.get(idx)?))
}

fn get_opt_time(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(from_millis))
}

fn get_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn get_opt_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Read a text column into one of the model enums
fn get_enum<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn get_opt_enum<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, Option<String>>(idx)?
        .map(|raw| raw.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Read a JSON text column
fn get_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_opt_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e)))
        .transpose()
}
