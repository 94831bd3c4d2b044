//! Shared utility functions used across multiple modules.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;

/// Maximum length of a sanitized error message before truncation.
pub const MAX_ERROR_LENGTH: usize = 200;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("Invalid regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("Invalid regex")
});
static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(password|passwd|username|email)(\s*[=:]\s*)\S+").expect("Invalid regex")
});

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Strip URLs, email addresses and credential values from an error message
/// and cap its length so it is safe to persist in run logs.
pub fn sanitize_error(message: &str) -> String {
    let cleaned = URL_RE.replace_all(message, "[URL]");
    let cleaned = EMAIL_RE.replace_all(&cleaned, "[EMAIL]");
    let cleaned = SECRET_RE.replace_all(&cleaned, "${1}${2}[REDACTED]");

    if cleaned.chars().count() > MAX_ERROR_LENGTH {
        let mut truncated: String = cleaned.chars().take(MAX_ERROR_LENGTH).collect();
        truncated.push_str("...");
        truncated
    } else {
        cleaned.into_owned()
    }
}

/// Stretch `base` by a random fraction in `[0, jitter)`.
pub fn jittered(base: Duration, jitter: f64) -> Duration {
    if base.is_zero() || jitter <= 0.0 {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen::<f64>() * jitter;
    base.mul_f64(factor)
}

/// Sleep for a jittered delay; returns immediately for a zero delay.
pub async fn pause(base: Duration, jitter: f64) {
    let delay = jittered(base, jitter);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Convert a stored Unix-millisecond value into a UTC timestamp.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
