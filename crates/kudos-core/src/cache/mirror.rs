//! In-memory mirror of cached payloads
//!
//! One slot per category. Each slot carries a generation that every mutation
//! bumps, so asynchronous writers that started earlier can tell whether the
//! slot moved on while they were waiting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kudos_types::Category;
use serde_json::Value;
use std::sync::Arc;

/// Where an entry's payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Loaded from persistent storage during warm-up
    Storage,
    /// Installed by `refresh_all` or a manual refresh
    Refresh,
    /// Installed by the preloader
    Preload,
}

/// A cached payload with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Shared so reads never copy the payload
    pub payload: Arc<Value>,
    /// Parameter the payload was fetched for (the user id for history)
    pub scope: Option<String>,
    pub origin: EntryOrigin,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(payload: Value, scope: Option<String>, origin: EntryOrigin) -> Self {
        Self {
            payload: Arc::new(payload),
            scope,
            origin,
            fetched_at: Utc::now(),
        }
    }

    /// Whether this entry was fetched for `scope`
    pub fn is_for(&self, scope: Option<&str>) -> bool {
        self.scope.as_deref() == scope
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    entry: Option<CacheEntry>,
}

/// Category -> entry map with per-slot generations
#[derive(Debug, Default)]
pub(crate) struct Mirror {
    slots: DashMap<Category, Slot>,
}

impl Mirror {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, category: Category) -> Option<CacheEntry> {
        self.slots.get(&category).and_then(|s| s.entry.clone())
    }

    pub(crate) fn payload(&self, category: Category) -> Option<Arc<Value>> {
        self.slots
            .get(&category)
            .and_then(|s| s.entry.as_ref().map(|e| Arc::clone(&e.payload)))
    }

    pub(crate) fn generation(&self, category: Category) -> u64 {
        self.slots.get(&category).map(|s| s.generation).unwrap_or(0)
    }

    /// Replace the entry unconditionally
    pub(crate) fn install(&self, category: Category, entry: CacheEntry) {
        let mut slot = self.slots.entry(category).or_default();
        slot.generation += 1;
        slot.entry = Some(entry);
    }

    /// Replace the entry only if nothing touched the slot since `generation`
    pub(crate) fn install_if_unchanged(
        &self,
        category: Category,
        generation: u64,
        entry: CacheEntry,
    ) -> bool {
        let mut slot = self.slots.entry(category).or_default();
        if slot.generation != generation {
            return false;
        }
        slot.generation += 1;
        slot.entry = Some(entry);
        true
    }

    /// Clear the entry, returning what was there
    pub(crate) fn clear(&self, category: Category) -> Option<CacheEntry> {
        let mut slot = self.slots.entry(category).or_default();
        slot.generation += 1;
        slot.entry.take()
    }
}
