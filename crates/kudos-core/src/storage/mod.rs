//! Persistent key-value storage
//!
//! `KeyValueStore` is the string-only store the host provides. Backends:
//! - `MemoryStore`: process-local, for tests and fully ephemeral runs
//! - `SqliteStore`: on-disk, scoped per user/device
//!
//! `PersistentStore` wraps a backend with JSON translation and fail-soft
//! semantics; the cache only ever talks to that adapter.

pub mod memory;
pub mod persistent;
pub mod sqlite;

pub use memory::MemoryStore;
pub use persistent::PersistentStore;
pub use sqlite::SqliteStore;

use crate::error::StorageError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

/// Longest key the host storage accepts
pub const MAX_KEY_LEN: usize = 128;

static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Asynchronous string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing an absent key succeeds
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Check a key against the host storage rules: 1-128 chars of `[A-Za-z0-9_-]`
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: format!("length must be 1-{} characters", MAX_KEY_LEN),
        });
    }
    if !KEY_PATTERN.is_match(key) {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "only A-Z, a-z, 0-9, '_' and '-' are allowed".to_string(),
        });
    }
    Ok(())
}
