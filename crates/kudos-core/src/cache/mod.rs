//! The kudos data cache
//!
//! One cache, two access patterns:
//! - durable categories (feed, market, leaderboard) are mirrored in memory
//!   and persisted, so a restart can render them before the network answers
//! - session categories (history, and anything configured `session_only`)
//!   live in memory only and are never shared across users
//!
//! Reads are synchronous and may return stale or absent data; everything
//! that touches storage or the network runs in the background and fails soft.

mod handles;
mod mirror;
mod preload;
mod schema;
mod writer;

pub use handles::{Pending, Warmup};
pub use mirror::{CacheEntry, EntryOrigin};
pub use schema::CategorySchema;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheHealth, FetchError, RefreshOutcome, RefreshReport};
use crate::event::{CacheEvent, EventBus};
use crate::source::DataSource;
use crate::storage::{KeyValueStore, PersistentStore};
use kudos_types::Category;
use mirror::Mirror;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use writer::StorageWriter;

/// Client-side cache over the rewards API
///
/// Owned by the application root and shared as `Arc<KudosCache>`; there is
/// no global instance. Background operations (`initialize`, preloads) must
/// be started from within a tokio runtime.
pub struct KudosCache {
    source: Arc<dyn DataSource>,

    /// Fail-soft adapter used for warm-up reads
    storage: PersistentStore,

    /// Ordered queue for persisted writes and removals
    writer: StorageWriter,

    schema: CategorySchema,
    config: CacheConfig,

    /// Synchronous read side
    mirror: Mirror,

    events: EventBus,

    initialized: AtomicBool,

    /// Serializes refresh passes
    refresh_gate: tokio::sync::Mutex<()>,
    /// Number of the most recently started pass
    refresh_started: AtomicU64,
    /// Number of the pass `last_report` belongs to
    refresh_finished: AtomicU64,
    last_report: RwLock<Option<RefreshReport>>,

    /// Preload fetches currently running, by category and parameter
    in_flight: Mutex<HashSet<(Category, Option<String>)>>,
}

impl KudosCache {
    pub fn new(
        source: Arc<dyn DataSource>,
        storage: Arc<dyn KeyValueStore>,
        config: CacheConfig,
    ) -> Self {
        let events = EventBus::default_capacity();
        let storage = PersistentStore::new(
            storage,
            events.clone(),
            config.storage_timeout(),
            config.max_value_bytes,
        );

        Self {
            source,
            writer: StorageWriter::new(storage.clone()),
            storage,
            schema: CategorySchema::from_config(&config),
            config,
            mirror: Mirror::new(),
            events,
            initialized: AtomicBool::new(false),
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_started: AtomicU64::new(0),
            refresh_finished: AtomicU64::new(0),
            last_report: RwLock::new(None),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(source: Arc<dyn DataSource>, storage: Arc<dyn KeyValueStore>) -> Self {
        Self::new(source, storage, CacheConfig::default())
    }

    pub fn schema(&self) -> &CategorySchema {
        &self.schema
    }

    /// Get the event bus for subscribing to cache events
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    // ===================
    // Read accessors
    // ===================

    /// Current payload of a category, possibly stale, `None` if not loaded.
    ///
    /// Never blocks. Callers fall back to their own fetch on `None`.
    pub fn read(&self, category: Category) -> Option<Arc<Value>> {
        let payload = self.mirror.payload(category);
        trace!(%category, hit = payload.is_some(), "Cache read");
        payload
    }

    /// Current entry of a category with its metadata
    pub fn entry(&self, category: Category) -> Option<CacheEntry> {
        self.mirror.get(category)
    }

    /// Report of the most recent refresh pass
    pub fn last_report(&self) -> Option<RefreshReport> {
        self.last_report.read().clone()
    }

    /// Degraded when the last refresh had failures or storage has failed
    /// since its last successful call
    pub fn health(&self) -> CacheHealth {
        let failing: Vec<Category> = self
            .last_report
            .read()
            .as_ref()
            .map(|r| r.failed().collect())
            .unwrap_or_default();
        let storage_errors = self.storage.failure_count();

        if failing.is_empty() && storage_errors == 0 {
            CacheHealth::Healthy
        } else {
            CacheHealth::Degraded {
                failing,
                storage_errors,
            }
        }
    }

    /// Keys currently held in persistent storage
    pub async fn persisted_keys(&self) -> Vec<String> {
        self.flush().await;
        self.storage.keys().await
    }

    // ===================
    // Warm-up
    // ===================

    /// Warm the mirror from storage, then reconcile with the API.
    ///
    /// Issues one storage read per durable category; each category becomes
    /// readable as soon as its own read completes. A background
    /// `refresh_all` starts right after. Only the first call reads storage;
    /// later calls just trigger another refresh.
    pub fn initialize(self: &Arc<Self>) -> Warmup {
        let first = !self.initialized.swap(true, Ordering::SeqCst);

        let mut loads = Vec::new();
        if first {
            info!("Warming cache from storage");
            for category in self.schema.durable_categories() {
                // Observed before the refresh below can touch the slot
                let generation = self.mirror.generation(category);
                let cache = Arc::clone(self);
                loads.push(tokio::spawn(async move {
                    cache.warm_category(category, generation).await;
                }));
            }
        }

        let cache = Arc::clone(self);
        let refresh = tokio::spawn(async move { cache.refresh_all().await });

        Warmup::new(loads, refresh)
    }

    async fn warm_category(&self, category: Category, generation: u64) {
        let key = self.schema.storage_key(category);
        let Some(value) = self.storage.get(&key).await else {
            debug!(%category, "Nothing persisted");
            return;
        };

        let entry = CacheEntry::new(value, None, EntryOrigin::Storage);
        if self.mirror.install_if_unchanged(category, generation, entry) {
            debug!(%category, "Warmed from storage");
            self.events.publish(CacheEvent::Warmed(category));
        } else {
            debug!(%category, "Newer data already present, persisted copy ignored");
        }
    }

    // ===================
    // Refresh
    // ===================

    /// Re-fetch every category and replace what succeeded.
    ///
    /// Covers all unparameterized categories plus populated session
    /// categories (re-fetched for the parameter they hold). Failures and
    /// timeouts keep the previous value and only show up in the report,
    /// the log and the event bus.
    ///
    /// Passes run one at a time. A pass already fetching when this call
    /// arrives may predate a mutation the caller expects to see, so the call
    /// waits for it and then fetches again. Callers that queue up behind the
    /// same pass share one new pass and get its report marked `coalesced`.
    pub async fn refresh_all(&self) -> RefreshReport {
        let arrived = self.refresh_started.load(Ordering::SeqCst);
        let _guard = self.refresh_gate.lock().await;

        if self.refresh_finished.load(Ordering::SeqCst) > arrived {
            if let Some(report) = self.last_report.read().as_ref() {
                debug!("Joined a refresh started after this call");
                return report.coalesced();
            }
        }

        let pass = self.refresh_started.fetch_add(1, Ordering::SeqCst) + 1;
        let report = self.run_refresh().await;

        *self.last_report.write() = Some(report.clone());
        self.refresh_finished.store(pass, Ordering::SeqCst);
        report
    }

    async fn run_refresh(&self) -> RefreshReport {
        let mut targets: Vec<(Category, Option<String>)> = Category::ALL
            .into_iter()
            .filter(|c| !c.is_parameterized())
            .map(|c| (c, None))
            .collect();
        for category in Category::ALL.into_iter().filter(|c| c.is_parameterized()) {
            if let Some(scope) = self.mirror.get(category).and_then(|e| e.scope) {
                targets.push((category, Some(scope)));
            }
        }

        let fetches = targets.into_iter().map(|(category, scope)| async move {
            let generation = self.mirror.generation(category);
            let result = self.fetch(category, scope.as_deref()).await;
            (category, scope, generation, result)
        });
        let results = futures::future::join_all(fetches).await;

        let mut report = RefreshReport::new();
        for (category, scope, generation, result) in results {
            match result {
                Ok(value) => {
                    let installed = if category.is_parameterized() {
                        self.install_guarded(category, generation, scope, value, EntryOrigin::Refresh)
                            .is_some()
                    } else {
                        self.install(category, scope, value, EntryOrigin::Refresh);
                        true
                    };

                    if installed {
                        report.record(category, RefreshOutcome::Updated);
                        self.events.publish(CacheEvent::Refreshed(category));
                    } else {
                        debug!(%category, "Session changed during refresh, result discarded");
                    }
                }
                Err(e) => {
                    warn!(%category, error = %e, "Refresh failed, keeping previous value");
                    let outcome = if e.is_timeout() {
                        RefreshOutcome::TimedOut
                    } else {
                        RefreshOutcome::Failed {
                            message: e.to_string(),
                        }
                    };
                    report.record(category, outcome);
                    self.events.publish(CacheEvent::FetchFailed {
                        category,
                        message: e.to_string(),
                    });
                }
            }
        }

        let updated = report.updated().count();
        let failed = report.failed().count();
        info!(updated, failed, "Refresh complete");
        self.events
            .publish(CacheEvent::RefreshCompleted { updated, failed });

        report
    }

    /// Fetch one category now and install the result.
    ///
    /// The explicit re-fetch a caller issues on a miss; unlike the background
    /// operations it reports failure.
    pub async fn refresh(
        &self,
        category: Category,
        param: Option<&str>,
    ) -> Result<Arc<Value>, CacheError> {
        let scope = scope_for(category, param)?;

        match self.fetch(category, scope.as_deref()).await {
            Ok(value) => {
                let payload = self.install(category, scope, value, EntryOrigin::Refresh);
                self.events.publish(CacheEvent::Refreshed(category));
                Ok(payload)
            }
            Err(e) => {
                warn!(%category, error = %e, "Refresh failed");
                self.events.publish(CacheEvent::FetchFailed {
                    category,
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    // ===================
    // Invalidation
    // ===================

    /// Clear a category.
    ///
    /// The mirror is cleared immediately; for durable categories removal of
    /// the persisted copy is queued even when nothing was cached.
    pub fn invalidate(&self, category: Category) {
        let previous = self.mirror.clear(category);
        if self.schema.is_durable(category) {
            self.writer.remove(self.schema.storage_key(category));
        }
        debug!(%category, had_value = previous.is_some(), "Invalidated");
        self.events.publish(CacheEvent::Invalidated(category));
    }

    pub fn invalidate_all(&self) {
        for category in Category::ALL {
            self.invalidate(category);
        }
    }

    /// Drop every session-scoped entry (logout, user switch)
    pub fn reset_session(&self) {
        for category in Category::ALL.into_iter().filter(|c| !self.schema.is_durable(*c)) {
            self.mirror.clear(category);
        }
        debug!("Session entries cleared");
        self.events.publish(CacheEvent::SessionReset);
    }

    /// Wait until all queued storage writes and removals are applied
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    // ===================
    // Internals
    // ===================

    async fn fetch(&self, category: Category, param: Option<&str>) -> Result<Value, FetchError> {
        let timeout = self.config.fetch_timeout();
        match tokio::time::timeout(timeout, self.source.fetch(category, param)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                category,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Replace the entry (last write wins) and queue persistence
    fn install(
        &self,
        category: Category,
        scope: Option<String>,
        value: Value,
        origin: EntryOrigin,
    ) -> Arc<Value> {
        let entry = CacheEntry::new(value, scope, origin);
        let payload = Arc::clone(&entry.payload);
        self.mirror.install(category, entry);
        self.persist(category, &payload);
        payload
    }

    /// Replace the entry only if the slot is still at `generation`
    fn install_guarded(
        &self,
        category: Category,
        generation: u64,
        scope: Option<String>,
        value: Value,
        origin: EntryOrigin,
    ) -> Option<Arc<Value>> {
        let entry = CacheEntry::new(value, scope, origin);
        let payload = Arc::clone(&entry.payload);
        if !self.mirror.install_if_unchanged(category, generation, entry) {
            return None;
        }
        self.persist(category, &payload);
        Some(payload)
    }

    fn persist(&self, category: Category, payload: &Arc<Value>) {
        if self.schema.is_durable(category) {
            self.writer
                .set(self.schema.storage_key(category), Arc::clone(payload));
        }
    }
}

/// Parameter an entry is keyed by: the given one for parameterized
/// categories, none otherwise
fn scope_for(category: Category, param: Option<&str>) -> Result<Option<String>, CacheError> {
    if !category.is_parameterized() {
        return Ok(None);
    }
    param
        .filter(|p| !p.is_empty())
        .map(|p| Some(p.to_string()))
        .ok_or(CacheError::MissingParameter { category })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    /// Source answering every category with `[<name>]`
    struct EchoSource;

    #[async_trait]
    impl DataSource for EchoSource {
        async fn fetch(&self, category: Category, param: Option<&str>) -> Result<Value, FetchError> {
            Ok(match param {
                Some(p) => json!([category.as_str(), p]),
                None => json!([category.as_str()]),
            })
        }
    }

    fn cache(storage: Arc<MemoryStore>) -> Arc<KudosCache> {
        Arc::new(KudosCache::with_defaults(Arc::new(EchoSource), storage))
    }

    #[tokio::test]
    async fn test_read_before_anything_loaded() {
        let cache = cache(Arc::new(MemoryStore::new()));
        for category in Category::ALL {
            assert!(cache.read(category).is_none());
        }
        assert!(cache.health().is_healthy());
    }

    #[tokio::test]
    async fn test_refresh_requires_parameter_for_history() {
        let cache = cache(Arc::new(MemoryStore::new()));

        let err = cache.refresh(Category::History, None).await.unwrap_err();
        assert!(matches!(err, CacheError::MissingParameter { category: Category::History }));

        let payload = cache.refresh(Category::History, Some("42")).await.unwrap();
        assert_eq!(*payload, json!(["history", "42"]));
        assert_eq!(
            cache.entry(Category::History).unwrap().scope.as_deref(),
            Some("42")
        );
    }

    #[tokio::test]
    async fn test_history_never_persisted() {
        let storage = Arc::new(MemoryStore::new());
        let cache = cache(storage.clone());

        cache.refresh(Category::History, Some("42")).await.unwrap();
        cache.refresh(Category::Feed, None).await.unwrap();
        cache.flush().await;

        assert!(storage.raw("history").is_none());
        assert_eq!(storage.raw("feed").as_deref(), Some(r#"["feed"]"#));
    }

    #[tokio::test]
    async fn test_refresh_all_includes_populated_history() {
        let cache = cache(Arc::new(MemoryStore::new()));

        let report = cache.refresh_all().await;
        assert!(report.outcome(Category::History).is_none());
        assert_eq!(report.updated().count(), 3);

        cache.refresh(Category::History, Some("7")).await.unwrap();
        let report = cache.refresh_all().await;
        assert_eq!(report.outcome(Category::History), Some(&RefreshOutcome::Updated));
        assert_eq!(
            cache.read(Category::History).as_deref(),
            Some(&json!(["history", "7"]))
        );
    }

    #[tokio::test]
    async fn test_reset_session_keeps_durable() {
        let cache = cache(Arc::new(MemoryStore::new()));
        cache.refresh(Category::History, Some("7")).await.unwrap();
        cache.refresh(Category::Market, None).await.unwrap();

        cache.reset_session();

        assert!(cache.read(Category::History).is_none());
        assert!(cache.read(Category::Market).is_some());
    }

    #[tokio::test]
    async fn test_session_only_category_not_persisted() {
        let storage = Arc::new(MemoryStore::new());
        let config = CacheConfig {
            session_only: vec![Category::Leaderboard],
            ..CacheConfig::default()
        };
        let cache = KudosCache::new(Arc::new(EchoSource), storage.clone(), config);

        cache.refresh_all().await;
        cache.flush().await;

        assert!(cache.read(Category::Leaderboard).is_some());
        assert!(storage.raw("leaderboard").is_none());
        assert!(storage.raw("market").is_some());
    }

    #[tokio::test]
    async fn test_key_prefix_applied() {
        let storage = Arc::new(MemoryStore::new());
        let config = CacheConfig {
            key_prefix: "u42".to_string(),
            ..CacheConfig::default()
        };
        let cache = KudosCache::new(Arc::new(EchoSource), storage.clone(), config);

        cache.refresh(Category::Feed, None).await.unwrap();
        assert_eq!(cache.persisted_keys().await, vec!["u42_feed"]);
    }
}
