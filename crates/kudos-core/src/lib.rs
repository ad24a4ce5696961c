//! kudos-core - Core library for kudos
//!
//! Provides the client-side data cache for the Kudos rewards app: a
//! synchronous in-memory mirror over persistent key-value storage, refreshed
//! from the REST API, plus the preloader that warms it ahead of navigation.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod source;
pub mod storage;

pub use cache::{CacheEntry, CategorySchema, EntryOrigin, KudosCache, Pending, Warmup};
pub use config::KudosConfig;
pub use error::{
    CacheError, CacheHealth, ConfigError, FetchError, RefreshOutcome, RefreshReport, StorageError,
};
pub use event::{CacheEvent, EventBus};
pub use kudos_types::{Category, Durability};
pub use source::{ApiClient, DataSource};
pub use storage::{KeyValueStore, MemoryStore, PersistentStore, SqliteStore};
