//! Error types for kudos-core
//!
//! Provides an error hierarchy with thiserror plus the report types used for
//! graceful degradation. Storage and fetch failures are recovered inside the
//! cache; these types describe them to whoever wants to look.

use kudos_types::{Category, ParseCategoryError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

// ===================
// Storage Errors
// ===================

/// Failure of the persistent key-value layer
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access storage at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid storage key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Value for '{key}' is {size} bytes, limit is {limit}")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("Malformed value stored under '{key}'")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize value for '{key}'")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Storage task failed: {message}")]
    Task { message: String },
}

// ===================
// Fetch Errors
// ===================

/// Failure of a category fetch against the API
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request for {category} failed")]
    Transport {
        category: Category,
        #[source]
        source: reqwest::Error,
    },

    #[error("API returned {status} for {category}: {detail}")]
    Status {
        category: Category,
        status: u16,
        detail: String,
    },

    #[error("Invalid JSON in {category} response")]
    Decode {
        category: Category,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetch of {category} timed out after {timeout_ms}ms")]
    Timeout { category: Category, timeout_ms: u64 },

    #[error("{category} requires a parameter (e.g. a user id)")]
    MissingParameter { category: Category },

    #[error("Invalid API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    /// Failure reported by a non-HTTP data source
    #[error("Fetch of {category} failed: {message}")]
    Source { category: Category, message: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

// ===================
// Cache Errors
// ===================

/// Errors surfaced by the explicit (non fire-and-forget) cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    UnknownCategory(#[from] ParseCategoryError),

    #[error("{category} requires a parameter (e.g. a user id)")]
    MissingParameter { category: Category },
}

// ===================
// Config Errors
// ===================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

// ===================
// Refresh reporting
// ===================

/// Result of refreshing a single category
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetched and installed
    Updated,
    /// Fetch failed, previous value kept
    Failed { message: String },
    /// Fetch exceeded the timeout, previous value kept
    TimedOut,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RefreshOutcome::Updated)
    }
}

/// Report of a `refresh_all` pass
///
/// Failures never propagate out of a refresh; they are collected here so the
/// host can surface systemic problems.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub outcomes: BTreeMap<Category, RefreshOutcome>,
    /// True when this call joined a refresh that was already running
    pub coalesced: bool,
}

impl RefreshReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, category: Category, outcome: RefreshOutcome) {
        self.outcomes.insert(category, outcome);
    }

    pub fn outcome(&self, category: Category) -> Option<&RefreshOutcome> {
        self.outcomes.get(&category)
    }

    /// Categories that were updated
    pub fn updated(&self) -> impl Iterator<Item = Category> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(c, _)| *c)
    }

    /// Categories that failed or timed out
    pub fn failed(&self) -> impl Iterator<Item = Category> + '_ {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(c, _)| *c)
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Copy of this report marked as shared with a concurrent caller
    pub fn coalesced(&self) -> Self {
        Self {
            outcomes: self.outcomes.clone(),
            coalesced: true,
        }
    }
}

/// Degraded state indicator for the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHealth {
    /// Last refresh succeeded everywhere and storage never failed
    Healthy,
    /// Serving stale or absent data for some categories
    Degraded {
        failing: Vec<Category>,
        storage_errors: u64,
    },
}

impl CacheHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CacheHealth::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        !self.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_report_partitions() {
        let mut report = RefreshReport::new();
        report.record(Category::Feed, RefreshOutcome::Updated);
        report.record(
            Category::Market,
            RefreshOutcome::Failed {
                message: "503".into(),
            },
        );
        report.record(Category::Leaderboard, RefreshOutcome::TimedOut);

        assert_eq!(report.updated().collect::<Vec<_>>(), vec![Category::Feed]);
        assert_eq!(
            report.failed().collect::<Vec<_>>(),
            vec![Category::Market, Category::Leaderboard]
        );
        assert!(report.has_failures());
    }

    #[test]
    fn test_coalesced_copy() {
        let mut report = RefreshReport::new();
        report.record(Category::Feed, RefreshOutcome::Updated);

        let shared = report.coalesced();
        assert!(shared.coalesced);
        assert!(!report.coalesced);
        assert_eq!(shared.outcomes, report.outcomes);
    }

    #[test]
    fn test_status_error_message() {
        let err = FetchError::Status {
            category: Category::Market,
            status: 403,
            detail: "Not registered".into(),
        };
        assert_eq!(err.to_string(), "API returned 403 for market: Not registered");
        assert!(!err.is_timeout());
    }
}
