//! Event bus for kudos using tokio::broadcast
//!
//! Every soft failure the cache swallows is also published here, so a host
//! can observe systemic problems (storage quota, API outage) without the
//! cache ever throwing at a caller.

use kudos_types::Category;
use tokio::sync::broadcast;

/// Events emitted by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A persisted value was loaded into the mirror during warm-up
    Warmed(Category),
    /// A category was replaced with freshly fetched data
    Refreshed(Category),
    /// A category was cleared
    Invalidated(Category),
    /// A category fetch failed; the previous value was kept
    FetchFailed { category: Category, message: String },
    /// A storage read, write or removal failed
    StorageFailed { key: String, message: String },
    /// A `refresh_all` pass finished
    RefreshCompleted { updated: usize, failed: usize },
    /// All session-scoped entries were dropped
    SessionReset,
}

/// Event bus for broadcasting cache events
///
/// Uses tokio::broadcast for multi-consumer support.
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CacheEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(CacheEvent::Refreshed(Category::Feed));
        bus.publish(CacheEvent::FetchFailed {
            category: Category::Market,
            message: "503".to_string(),
        });

        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Refreshed(Category::Feed));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::FetchFailed { category: Category::Market, .. }
        ));
    }

    #[tokio::test]
    async fn test_event_bus_clone_shares_channel() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.clone().publish(CacheEvent::SessionReset);

        assert_eq!(rx.recv().await.unwrap(), CacheEvent::SessionReset);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default_capacity();
        bus.publish(CacheEvent::Invalidated(Category::Feed));
    }
}
