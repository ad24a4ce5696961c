//! kudos-types - Shared data types for kudos
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - kudos-core (cache, storage, API client)
//! - kudos (CLI rendering)

pub mod category;
pub mod models;

pub use category::{Category, Durability, ParseCategoryError};

pub use models::{row_count, rows, FeedEvent, LeaderboardEntry, MarketItem, Transaction};
