//! Cache categories
//!
//! The fixed set of payload kinds the client caches. Categories are known at
//! compile time; there is no dynamic registration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named kind of cacheable payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Recent transfers between colleagues
    Feed,
    /// Items purchasable with points
    Market,
    /// Ranking of users by received points
    Leaderboard,
    /// Transaction history of one user (needs the user id)
    History,
}

impl Category {
    /// Every category, in display order
    pub const ALL: [Category; 4] = [
        Category::Feed,
        Category::Market,
        Category::Leaderboard,
        Category::History,
    ];

    /// Lowercase name, also used as the storage key
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Feed => "feed",
            Category::Market => "market",
            Category::Leaderboard => "leaderboard",
            Category::History => "history",
        }
    }

    /// Whether fetching this category needs a runtime parameter
    pub fn is_parameterized(&self) -> bool {
        matches!(self, Category::History)
    }

    /// Durability when configuration does not override it.
    ///
    /// Parameterized payloads belong to one user and must never outlive the
    /// session, so they are always session-scoped.
    pub fn default_durability(&self) -> Durability {
        if self.is_parameterized() {
            Durability::Session
        } else {
            Durability::Durable
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCategoryError {
    pub input: String,
}

impl fmt::Display for ParseCategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown category '{}' (expected one of: feed, market, leaderboard, history)",
            self.input
        )
    }
}

impl std::error::Error for ParseCategoryError {}

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feed" => Ok(Category::Feed),
            "market" => Ok(Category::Market),
            "leaderboard" => Ok(Category::Leaderboard),
            "history" => Ok(Category::History),
            _ => Err(ParseCategoryError {
                input: s.to_string(),
            }),
        }
    }
}

/// Whether a category's payload is mirrored to persistent storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Mirrored in memory and persisted across restarts
    Durable,
    /// Memory only, lost with the session
    Session,
}
