use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::Session;
use crate::db::{SettingsRepository, SqliteSettingsRepository};
use crate::error::Result;

/// Cached session kept in the settings row
pub struct SessionStore<'a> {
    settings: SqliteSettingsRepository<'a>,
}

impl<'a> SessionStore<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            settings: SqliteSettingsRepository::new(conn),
        }
    }

    /// The stored session, or `None` when absent or expired
    pub fn get(&self, now: DateTime<Utc>) -> Result<Option<Session>> {
        let settings = self.settings.load()?;
        let (Some(token), Some(expires_at)) = (settings.session_token, settings.session_expires_at)
        else {
            return Ok(None);
        };

        let session = Session::new(token, expires_at);
        if session.is_expired(now) {
            tracing::debug!("Cached session expired");
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn store(&self, session: &Session) -> Result<()> {
        self.settings
            .save_session(session.token(), session.expires_at())
    }

    pub fn clear(&self) -> Result<()> {
        self.settings.clear_session()
    }
}
