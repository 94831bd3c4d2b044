//! Error types for roost-core

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias using roost-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in roost-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Transport-level HTTP failure (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the booking site
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// The booking site served its login page instead of the requested one
    #[error("Session expired: login page returned")]
    SessionExpired,

    /// Login could not be completed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Markup was present but could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        let server = Error::HttpStatus {
            status: 503,
            url: "https://example.com".into(),
        };
        let limited = Error::HttpStatus {
            status: 429,
            url: "https://example.com".into(),
        };
        let missing = Error::HttpStatus {
            status: 404,
            url: "https://example.com".into(),
        };

        assert!(server.is_transient());
        assert!(limited.is_transient());
        assert!(!missing.is_transient());
        assert!(!Error::SessionExpired.is_transient());
        assert!(!Error::Parse("bad pricing".into()).is_transient());
    }
}
