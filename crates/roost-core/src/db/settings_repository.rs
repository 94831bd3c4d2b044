//! Settings repository for the single sync settings row

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};

use super::{date_text, get_opt_date, get_opt_enum, get_opt_time, millis};
use crate::error::Result;
use crate::models::{RunStatus, SyncSettings};

/// Trait for sync settings storage
pub trait SettingsRepository {
    /// Load the settings row
    fn load(&self) -> Result<SyncSettings>;

    /// Store a session token and its expiry
    fn save_session(&self, token: &str, expires_at: DateTime<Utc>) -> Result<()>;

    /// Forget any cached session
    fn clear_session(&self) -> Result<()>;

    /// Record the outcome of the latest sync run
    fn save_sync_outcome(
        &self,
        at: DateTime<Utc>,
        status: RunStatus,
        message: &str,
    ) -> Result<()>;

    /// Store the next week the schedule scanner should visit
    fn save_schedule_cursor(&self, date: NaiveDate) -> Result<()>;
}

/// `SQLite` implementation of `SettingsRepository`
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new settings repository
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn update(&self, assignments: &str, values: &[&dyn rusqlite::ToSql]) -> Result<()> {
        // The seed row can be missing if the table was emptied by hand
        self.conn
            .execute("INSERT OR IGNORE INTO sync_settings (id) VALUES (1)", [])?;
        self.conn.execute(
            &format!("UPDATE sync_settings SET {assignments} WHERE id = 1"),
            values,
        )?;
        Ok(())
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn load(&self) -> Result<SyncSettings> {
        let settings = self.conn.query_row(
            "SELECT session_cookies, session_expires_at, last_sync_at, last_sync_status,
                    last_sync_message, schedule_cursor_date
             FROM sync_settings WHERE id = 1",
            [],
            |row| {
                Ok(SyncSettings {
                    session_token: row.get(0)?,
                    session_expires_at: get_opt_time(row, 1)?,
                    last_sync_at: get_opt_time(row, 2)?,
                    last_sync_status: get_opt_enum(row, 3)?,
                    last_sync_message: row.get(4)?,
                    schedule_cursor_date: get_opt_date(row, 5)?,
                })
            },
        );

        match settings {
            Ok(settings) => Ok(settings),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(SyncSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_session(&self, token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.update(
            "session_cookies = ?, session_expires_at = ?",
            params![token, millis(expires_at)],
        )
    }

    fn clear_session(&self) -> Result<()> {
        self.update("session_cookies = NULL, session_expires_at = NULL", &[])
    }

    fn save_sync_outcome(
        &self,
        at: DateTime<Utc>,
        status: RunStatus,
        message: &str,
    ) -> Result<()> {
        self.update(
            "last_sync_at = ?, last_sync_status = ?, last_sync_message = ?",
            params![millis(at), status.as_str(), message],
        )
    }

    fn save_schedule_cursor(&self, date: NaiveDate) -> Result<()> {
        self.update("schedule_cursor_date = ?", params![date_text(date)])
    }
}
