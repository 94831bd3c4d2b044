//! Error categories attached to recorded sync failures

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::RunError;

text_enum! {
    ErrorCategory {
        Auth => "auth_error",
        Network => "network_error",
        Parse => "parse_error",
        Save => "save_error",
        RateLimit => "rate_limit",
        Timeout => "timeout",
        Unknown => "unknown",
    }
}

// Checked in order; the first match wins.
static PATTERNS: LazyLock<Vec<(ErrorCategory, Regex)>> = LazyLock::new(|| {
    [
        (
            ErrorCategory::Auth,
            r"(?i)auth|login|credential|unauthori[sz]ed|\b401\b|\b403\b|session\s*expired|invalid\s*token",
        ),
        (
            ErrorCategory::Network,
            r"(?i)fetch|network|econnrefused|enotfound|connection\s*refused|\bdns\b|socket|error sending request",
        ),
        (
            ErrorCategory::RateLimit,
            r"(?i)rate\s*limit|\b429\b|too\s*many\s*requests|throttl",
        ),
        (
            ErrorCategory::Timeout,
            r"(?i)timeout|etimedout|timed\s*out|aborted",
        ),
        (
            ErrorCategory::Parse,
            r"(?i)parse|json|unexpected\s*token|invalid\s*html|selector|element\s*not\s*found",
        ),
        (
            ErrorCategory::Save,
            r"(?i)database|sqlite|duplicate\s*key|constraint|insert|update",
        ),
    ]
    .into_iter()
    .map(|(category, pattern)| (category, Regex::new(pattern).expect("Invalid regex")))
    .collect()
});

impl ErrorCategory {
    /// Category of an error from its message text
    pub fn categorize(message: &str) -> Self {
        PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(message))
            .map_or(Self::Unknown, |(category, _)| *category)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Auth => "Authentication failed - check credentials",
            Self::Network => "Network error - check internet connection",
            Self::Parse => "Failed to parse data - site may have changed",
            Self::Save => "Failed to save to database",
            Self::RateLimit => "Rate limited - too many requests",
            Self::Timeout => "Request timed out",
            Self::Unknown => "Unknown error occurred",
        }
    }

    /// Whether waiting and retrying is likely to help
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Timeout)
    }

    pub const fn recommended_action(self) -> &'static str {
        match self {
            Self::Auth => "Check the booking site credentials",
            Self::Network => "Check the network connection and try again",
            Self::Parse => "The booking site markup may have changed",
            Self::Save => "Check the local database and try again",
            Self::RateLimit => "Wait a few minutes before syncing again",
            Self::Timeout => "Check the connection and try again",
            Self::Unknown => "Try again; inspect the run log if it persists",
        }
    }
}

/// Roll-up of a run's errors by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub most_common: Option<ErrorCategory>,
    pub recoverable: usize,
}

pub fn analyze_errors(errors: &[RunError]) -> ErrorSummary {
    let mut counts: BTreeMap<ErrorCategory, usize> = BTreeMap::new();
    for error in errors {
        *counts.entry(error.category).or_default() += 1;
    }

    let most_common = counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(category, _)| *category);

    ErrorSummary {
        total: errors.len(),
        recoverable: errors.iter().filter(|e| e.category.is_recoverable()).count(),
        by_category: counts
            .into_iter()
            .map(|(category, count)| (category.as_str().to_string(), count))
            .collect(),
        most_common,
    }
}
