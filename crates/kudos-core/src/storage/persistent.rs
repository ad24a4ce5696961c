//! Fail-soft JSON adapter over a `KeyValueStore`
//!
//! Translates between the backend's string values and JSON payloads. No
//! operation returns an error: failures are logged, counted and published as
//! `CacheEvent::StorageFailed`, and reads degrade to "nothing stored". The
//! failure count resets on the next successful call.

use super::{validate_key, KeyValueStore};
use crate::error::StorageError;
use crate::event::{CacheEvent, EventBus};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Persistent key-value adapter used by the cache
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn KeyValueStore>,
    events: EventBus,
    timeout: Duration,
    /// Host storage quota; unset for backends without one
    max_value_bytes: Option<usize>,
    failures: Arc<AtomicU64>,
}

impl PersistentStore {
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        events: EventBus,
        timeout: Duration,
        max_value_bytes: Option<usize>,
    ) -> Self {
        Self {
            backend,
            events,
            timeout,
            max_value_bytes,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stored payload, or `None` on miss, error, timeout or malformed JSON
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Err(e) = validate_key(key) {
            self.report(key, &e);
            return None;
        }

        let raw = match self.bounded("get", self.backend.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.recovered();
                debug!(key, "Storage miss");
                return None;
            }
            Err(e) => {
                self.report(key, &e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.recovered();
                debug!(key, bytes = raw.len(), "Storage hit");
                Some(value)
            }
            Err(e) => {
                self.report(
                    key,
                    &StorageError::Malformed {
                        key: key.to_string(),
                        source: e,
                    },
                );
                None
            }
        }
    }

    /// Serialize and store a payload; returns whether it was written
    pub async fn set(&self, key: &str, value: &Value) -> bool {
        if let Err(e) = validate_key(key) {
            self.report(key, &e);
            return false;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.report(
                    key,
                    &StorageError::Serialize {
                        key: key.to_string(),
                        source: e,
                    },
                );
                return false;
            }
        };

        if let Some(limit) = self.max_value_bytes.filter(|limit| raw.len() > *limit) {
            self.report(
                key,
                &StorageError::ValueTooLarge {
                    key: key.to_string(),
                    size: raw.len(),
                    limit,
                },
            );
            return false;
        }

        match self.bounded("set", self.backend.set(key, &raw)).await {
            Ok(()) => {
                self.recovered();
                debug!(key, bytes = raw.len(), "Stored");
                true
            }
            Err(e) => {
                self.report(key, &e);
                false
            }
        }
    }

    /// Remove a stored payload; returns whether the backend confirmed it
    pub async fn remove(&self, key: &str) -> bool {
        if let Err(e) = validate_key(key) {
            self.report(key, &e);
            return false;
        }

        match self.bounded("remove", self.backend.remove(key)).await {
            Ok(()) => {
                self.recovered();
                debug!(key, "Removed");
                true
            }
            Err(e) => {
                self.report(key, &e);
                false
            }
        }
    }

    /// Stored keys, empty on failure
    pub async fn keys(&self) -> Vec<String> {
        match self.bounded("keys", self.backend.keys()).await {
            Ok(keys) => {
                self.recovered();
                keys
            }
            Err(e) => {
                self.report("*", &e);
                Vec::new()
            }
        }
    }

    /// Storage failures since the last successful call
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    fn recovered(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn report(&self, key: &str, error: &StorageError) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        warn!(key, error = %error, "Storage operation failed");
        self.events.publish(CacheEvent::StorageFailed {
            key: key.to_string(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn adapter(backend: Arc<dyn KeyValueStore>) -> (PersistentStore, EventBus) {
        let events = EventBus::default_capacity();
        let store = PersistentStore::new(backend, events.clone(), Duration::from_secs(1), None);
        (store, events)
    }

    /// Backend whose every call fails
    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Task {
                message: "quota exceeded".into(),
            })
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Task {
                message: "quota exceeded".into(),
            })
        }
        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Task {
                message: "quota exceeded".into(),
            })
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Task {
                message: "quota exceeded".into(),
            })
        }
    }

    /// Backend that never answers
    struct HangingStore;

    #[async_trait]
    impl KeyValueStore for HangingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            std::future::pending().await
        }
        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            std::future::pending().await
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_json_roundtrip_through_strings() {
        let backend = Arc::new(MemoryStore::new());
        let (store, _) = adapter(backend.clone());

        let payload = json!([{"id": 1, "name": "Mug", "price": 50}]);
        assert!(store.set("market", &payload).await);

        assert_eq!(
            backend.raw("market").as_deref(),
            Some(r#"[{"id":1,"name":"Mug","price":50}]"#)
        );
        assert_eq!(store.get("market").await, Some(payload));
    }

    #[tokio::test]
    async fn test_malformed_value_reads_as_miss() {
        let backend = Arc::new(MemoryStore::with_entries([("feed", "{not json")]));
        let (store, events) = adapter(backend);
        let mut rx = events.subscribe();

        assert!(store.get("feed").await.is_none());
        assert_eq!(store.failure_count(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::StorageFailed { key, .. } if key == "feed"
        ));
    }

    #[tokio::test]
    async fn test_backend_errors_are_swallowed() {
        let (store, _) = adapter(Arc::new(BrokenStore));

        assert!(store.get("feed").await.is_none());
        assert!(!store.set("feed", &json!([])).await);
        assert!(!store.remove("feed").await);
        assert!(store.keys().await.is_empty());
        assert_eq!(store.failure_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let (store, _) = adapter(Arc::new(HangingStore));

        assert!(store.get("feed").await.is_none());
        assert!(!store.remove("feed").await);
        assert_eq!(store.failure_count(), 2);
    }

    #[tokio::test]
    async fn test_oversized_value_rejected() {
        let backend = Arc::new(MemoryStore::new());
        let events = EventBus::default_capacity();
        let store = PersistentStore::new(backend.clone(), events, Duration::from_secs(1), Some(16));

        assert!(!store.set("market", &json!(["x".repeat(32)])).await);
        assert!(backend.raw("market").is_none());
        assert_eq!(store.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_by_default() {
        let backend = Arc::new(MemoryStore::new());
        let (store, _) = adapter(backend.clone());

        let items: Vec<_> = (0..40)
            .map(|id| json!({"id": id, "name": format!("Item {}", id), "description": "x".repeat(80)}))
            .collect();
        let payload = Value::Array(items);
        assert!(serde_json::to_string(&payload).unwrap().len() > 4_096);

        assert!(store.set("market", &payload).await);
        assert_eq!(store.get("market").await, Some(payload));
        assert_eq!(store.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_count_resets_after_success() {
        let backend = Arc::new(MemoryStore::with_entries([("feed", "{not json")]));
        let (store, _) = adapter(backend);

        assert!(store.get("feed").await.is_none());
        assert!(!store.set("bad key", &json!(1)).await);
        assert_eq!(store.failure_count(), 2);

        assert!(store.set("feed", &json!([])).await);
        assert_eq!(store.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let backend = Arc::new(MemoryStore::new());
        let (store, _) = adapter(backend.clone());

        assert!(!store.set("bad key", &json!(1)).await);
        assert!(backend.is_empty());
    }
}
