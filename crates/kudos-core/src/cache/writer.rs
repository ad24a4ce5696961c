//! Ordered background storage writes
//!
//! Mirror updates are synchronous; their persisted counterparts are queued
//! here and applied by a single task in submission order, so a removal
//! queued after a write always wins.

use crate::storage::PersistentStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

pub(crate) enum StorageOp {
    Set { key: String, payload: Arc<Value> },
    Remove { key: String },
    Flush(oneshot::Sender<()>),
}

/// Queue feeding the writer task
///
/// The task starts on the first submission made inside a tokio runtime.
/// Submissions made without a runtime stay queued until then.
pub(crate) struct StorageWriter {
    tx: mpsc::UnboundedSender<StorageOp>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<StorageOp>>>,
    store: PersistentStore,
}

impl StorageWriter {
    pub(crate) fn new(store: PersistentStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            store,
        }
    }

    pub(crate) fn set(&self, key: String, payload: Arc<Value>) {
        self.submit(StorageOp::Set { key, payload });
    }

    pub(crate) fn remove(&self, key: String) {
        self.submit(StorageOp::Remove { key });
    }

    /// Wait until every operation submitted so far has been applied
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.submit(StorageOp::Flush(done));
        let _ = wait.await;
    }

    fn submit(&self, op: StorageOp) {
        // The receiver lives in this struct or in the task, so send only
        // fails once the task has exited with the runtime.
        if self.tx.send(op).is_err() {
            debug!("Storage writer stopped, dropping operation");
            return;
        }
        self.ensure_running();
    }

    fn ensure_running(&self) {
        let mut slot = self.rx.lock();
        if slot.is_none() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("No async runtime yet, storage operations deferred");
            return;
        };
        if let Some(rx) = slot.take() {
            handle.spawn(run(self.store.clone(), rx));
        }
    }
}

async fn run(store: PersistentStore, mut rx: mpsc::UnboundedReceiver<StorageOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            StorageOp::Set { key, payload } => {
                store.set(&key, &payload).await;
            }
            StorageOp::Remove { key } => {
                store.remove(&key).await;
            }
            StorageOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    trace!("Storage writer finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn writer(backend: Arc<MemoryStore>) -> StorageWriter {
        StorageWriter::new(PersistentStore::new(
            backend,
            EventBus::default_capacity(),
            Duration::from_secs(1),
            None,
        ))
    }

    #[tokio::test]
    async fn test_operations_apply_in_order() {
        let backend = Arc::new(MemoryStore::new());
        let writer = writer(backend.clone());

        writer.set("feed".into(), Arc::new(json!([1])));
        writer.remove("feed".into());
        writer.set("market".into(), Arc::new(json!([2])));
        writer.flush().await;

        assert!(backend.raw("feed").is_none());
        assert_eq!(backend.raw("market").as_deref(), Some("[2]"));
    }

    #[test]
    fn test_submissions_without_runtime_are_deferred() {
        let backend = Arc::new(MemoryStore::new());
        let writer = writer(backend.clone());

        writer.set("feed".into(), Arc::new(json!(["queued"])));
        assert!(backend.is_empty());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(writer.flush());

        assert_eq!(backend.raw("feed").as_deref(), Some(r#"["queued"]"#));
    }
}
