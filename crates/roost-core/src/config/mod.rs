//! Runtime configuration for the sync engine.
//!
//! Values come from environment variables (optionally seeded from a `.env`
//! file by the binary). Every knob has a default except the site URL.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::is_http_url;

/// Default delay between requests to the booking site.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1500;
/// Default jitter fraction applied on top of the request delay.
pub const DEFAULT_JITTER: f64 = 0.2;
/// Default per-request timeout for page fetches.
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 15;
/// Default timeout for the login round-trip.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;
/// Default ceiling on schedule pages followed per week.
pub const DEFAULT_MAX_SCHEDULE_PAGES: usize = 10;
/// Default fraction of degraded detail parses tolerated before warning.
pub const DEFAULT_PARSE_DEGRADATION_THRESHOLD: f64 = 0.2;
/// Lifetime of a cached session cookie.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// User agent presented to the booking site.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; RoostSync/1.0)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by every sync entry point.
#[derive(Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_delay: Duration,
    pub jitter: f64,
    pub page_timeout: Duration,
    pub auth_timeout: Duration,
    pub max_schedule_pages: usize,
    /// Waits before each retry of a transient failure; its length is the retry count.
    pub retry_delays: Vec<Duration>,
    pub overwrite_manual: bool,
    pub parse_degradation_threshold: f64,
    pub session_ttl: Duration,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("request_delay", &self.request_delay)
            .field("jitter", &self.jitter)
            .field("page_timeout", &self.page_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("max_schedule_pages", &self.max_schedule_pages)
            .field("retry_delays", &self.retry_delays)
            .field("overwrite_manual", &self.overwrite_manual)
            .field(
                "parse_degradation_threshold",
                &self.parse_degradation_threshold,
            )
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

impl SyncConfig {
    /// Build a configuration with defaults for everything but the site URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_trailing(&base_url.into()).to_string(),
            username: None,
            password: None,
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            jitter: DEFAULT_JITTER,
            page_timeout: Duration::from_secs(DEFAULT_PAGE_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            max_schedule_pages: DEFAULT_MAX_SCHEDULE_PAGES,
            retry_delays: default_retry_delays(),
            overwrite_manual: false,
            parse_degradation_threshold: DEFAULT_PARSE_DEGRADATION_THRESHOLD,
            session_ttl: SESSION_TTL,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Disable request pacing and retry waits (used by tests and one-off tooling).
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.request_delay = Duration::ZERO;
        self.jitter = 0.0;
        self.retry_delays = vec![Duration::ZERO; self.retry_delays.len()];
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = required_trimmed(&lookup, "ROOST_SITE_URL")?;
        if !is_http_url(&base_url) {
            return Err(ConfigError::Invalid(
                "ROOST_SITE_URL must start with http:// or https://".to_string(),
            ));
        }

        let mut config = Self::new(base_url);
        config.username = optional_trimmed(&lookup, "ROOST_SITE_USERNAME");
        config.password = lookup("ROOST_SITE_PASSWORD").filter(|value| !value.is_empty());

        let delay_ms = bounded_integer(&lookup, "ROOST_REQUEST_DELAY_MS", DEFAULT_REQUEST_DELAY_MS, 0, 60_000)?;
        config.request_delay = Duration::from_millis(delay_ms);

        config.jitter = bounded_fraction(&lookup, "ROOST_REQUEST_JITTER", DEFAULT_JITTER)?;

        let timeout_secs =
            bounded_integer(&lookup, "ROOST_PAGE_TIMEOUT_SECS", DEFAULT_PAGE_TIMEOUT_SECS, 1, 120)?;
        config.page_timeout = Duration::from_secs(timeout_secs);

        let max_pages = bounded_integer(
            &lookup,
            "ROOST_MAX_SCHEDULE_PAGES",
            DEFAULT_MAX_SCHEDULE_PAGES as u64,
            1,
            100,
        )?;
        config.max_schedule_pages = usize::try_from(max_pages)
            .map_err(|_| ConfigError::Invalid("ROOST_MAX_SCHEDULE_PAGES is too large".to_string()))?;

        config.overwrite_manual = match optional_trimmed(&lookup, "ROOST_OVERWRITE_MANUAL") {
            None => false,
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::Invalid("ROOST_OVERWRITE_MANUAL must be true or false".to_string())
            })?,
        };

        config.parse_degradation_threshold = bounded_fraction(
            &lookup,
            "ROOST_PARSE_DEGRADATION_THRESHOLD",
            DEFAULT_PARSE_DEGRADATION_THRESHOLD,
        )?;

        Ok(config)
    }

    /// Week-view URL for the seven days starting at `date`.
    pub fn week_url(&self, date: chrono::NaiveDate) -> String {
        use chrono::Datelike;
        format!(
            "{}/schedule/days-7/{}/{}/{}",
            self.base_url,
            date.year(),
            date.month(),
            date.day()
        )
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }
}

fn default_retry_delays() -> Vec<Duration> {
    vec![
        Duration::from_secs(5),
        Duration::from_secs(30),
        Duration::from_secs(300),
    ]
}

fn bounded_integer(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!("{name} must be an integer between {min} and {max}"))
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(value)
}

fn bounded_fraction(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: f64,
) -> Result<f64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a number between 0 and 1")))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be between 0 and 1"
        )));
    }
    Ok(value)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn trim_trailing(value: &str) -> &str {
    value.trim().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    fn config_from(map: &HashMap<&str, &str>) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn config_requires_site_url() {
        let map: HashMap<&str, &str> = HashMap::new();
        let err = config_from(&map).unwrap_err();
        assert!(err.to_string().contains("ROOST_SITE_URL"));
    }

    #[test]
    fn config_rejects_non_http_site_url() {
        let map = HashMap::from([("ROOST_SITE_URL", "agency.example.com")]);
        assert!(matches!(config_from(&map), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_applies_defaults() {
        let map = HashMap::from([("ROOST_SITE_URL", "https://agency.example.com/")]);
        let config = config_from(&map).unwrap();

        assert_eq!(config.base_url, "https://agency.example.com");
        assert_eq!(config.request_delay, Duration::from_millis(1500));
        assert_eq!(config.page_timeout, Duration::from_secs(15));
        assert_eq!(config.max_schedule_pages, 10);
        assert_eq!(config.retry_delays.len(), 3);
        assert!(!config.overwrite_manual);
        assert_eq!(config.username, None);
    }

    #[test]
    fn config_reads_overrides() {
        let map = HashMap::from([
            ("ROOST_SITE_URL", "https://agency.example.com"),
            ("ROOST_SITE_USERNAME", " owner "),
            ("ROOST_SITE_PASSWORD", "secret"),
            ("ROOST_REQUEST_DELAY_MS", "250"),
            ("ROOST_MAX_SCHEDULE_PAGES", "4"),
            ("ROOST_OVERWRITE_MANUAL", "yes"),
            ("ROOST_PARSE_DEGRADATION_THRESHOLD", "0.5"),
        ]);
        let config = config_from(&map).unwrap();

        assert_eq!(config.username.as_deref(), Some("owner"));
        assert_eq!(config.request_delay, Duration::from_millis(250));
        assert_eq!(config.max_schedule_pages, 4);
        assert!(config.overwrite_manual);
        assert!((config.parse_degradation_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let map = HashMap::from([
            ("ROOST_SITE_URL", "https://agency.example.com"),
            ("ROOST_PAGE_TIMEOUT_SECS", "0"),
        ]);
        assert!(config_from(&map).is_err());

        let map = HashMap::from([
            ("ROOST_SITE_URL", "https://agency.example.com"),
            ("ROOST_REQUEST_JITTER", "1.5"),
        ]);
        assert!(config_from(&map).is_err());
    }

    #[test]
    fn config_redacts_password_in_debug() {
        let config = SyncConfig::new("https://agency.example.com")
            .with_credentials("owner", "sensitive-password");
        let debug_output = format!("{config:?}");

        assert!(!debug_output.contains("sensitive-password"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn week_url_uses_unpadded_date_segments() {
        let config = SyncConfig::new("https://agency.example.com");
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(
            config.week_url(date),
            "https://agency.example.com/schedule/days-7/2025/3/4"
        );
    }
}
