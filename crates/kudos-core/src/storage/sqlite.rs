//! SQLite key-value store
//!
//! Stands in for the host's per-user storage when running outside the host.
//!
//! Schema:
//! - kv_entries table: (scope, key) -> value + updated_at
//! - store_metadata table: schema version
//!
//! Every scope (user/device) sees only its own keys. A version mismatch on
//! open clears all entries, since the stored payload shapes may have changed.

use super::KeyValueStore;
use crate::error::StorageError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Current store layout version
///
/// Increment when the meaning of stored values changes. Older data is then
/// discarded on open instead of being served as stale payloads.
const STORE_VERSION: i32 = 1;

/// SQLite-backed key-value store (thread-safe)
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
    scope: String,
}

impl SqliteStore {
    /// Create or open the database file
    pub fn open(path: &Path, scope: impl Into<String>) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self::from_connection(conn, Some(path.to_path_buf()), scope.into())?;
        debug!(path = %path.display(), scope = %store.scope, "SQLite store opened");
        Ok(store)
    }

    /// Database that lives only as long as this value
    pub fn in_memory(scope: impl Into<String>) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, None, scope.into())
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        scope: String,
    ) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS store_metadata (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv_entries (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            );
            "#,
        )?;

        let stored_version: Option<i32> = conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version {
            Some(v) if v != STORE_VERSION => {
                warn!(
                    stored = v,
                    current = STORE_VERSION,
                    "Store version mismatch, clearing stale entries"
                );
                conn.execute("DELETE FROM kv_entries", [])?;
                conn.execute(
                    "INSERT OR REPLACE INTO store_metadata (key, value) VALUES ('version', ?)",
                    params![STORE_VERSION],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO store_metadata (key, value) VALUES ('version', ?)",
                    params![STORE_VERSION],
                )?;
            }
            Some(_) => {}
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            scope,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Delete every entry of this scope
    pub async fn clear_scope(&self) -> Result<usize, StorageError> {
        self.run(|conn, scope| conn.execute("DELETE FROM kv_entries WHERE scope = ?", params![scope]))
            .await
    }

    /// Total bytes stored for this scope
    pub async fn size_bytes(&self) -> Result<u64, StorageError> {
        self.run(|conn, scope| {
            conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM kv_entries WHERE scope = ?",
                params![scope],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as u64)
    }

    /// Run a blocking statement off the async runtime
    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let scope = self.scope.clone();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard, &scope)
        })
        .await
        .map_err(|e| StorageError::Task {
            message: e.to_string(),
        })?
        .map_err(StorageError::from)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_string();
        self.run(move |conn, scope| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE scope = ? AND key = ?",
                params![scope, key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        let value = value.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.run(move |conn, scope| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_entries (scope, key, value, updated_at) VALUES (?, ?, ?, ?)",
                params![scope, key, value, now],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.run(move |conn, scope| {
            conn.execute(
                "DELETE FROM kv_entries WHERE scope = ? AND key = ?",
                params![scope, key],
            )
            .map(|_| ())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.run(|conn, scope| {
            let mut stmt = conn.prepare("SELECT key FROM kv_entries WHERE scope = ? ORDER BY key")?;
            let rows = stmt.query_map(params![scope], |row| row.get::<_, String>(0))?;
            let keys = rows.collect::<rusqlite::Result<Vec<String>>>();
            keys
        })
        .await
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        // Flush the WAL so it doesn't grow unbounded across restarts
        if self.path.is_some() {
            if let Err(e) = self
                .conn
                .lock()
                .pragma_update(None, "wal_checkpoint", "TRUNCATE")
            {
                warn!("Failed to checkpoint WAL on SqliteStore drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = SqliteStore::in_memory("u1").unwrap();

        store.set("market", r#"[{"id":1}]"#).await.unwrap();
        assert_eq!(
            store.get("market").await.unwrap().as_deref(),
            Some(r#"[{"id":1}]"#)
        );

        store.set("market", "[]").await.unwrap();
        assert_eq!(store.get("market").await.unwrap().as_deref(), Some("[]"));

        store.remove("market").await.unwrap();
        assert!(store.get("market").await.unwrap().is_none());
        store.remove("market").await.unwrap();
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = SqliteStore::open(&path, "u1").unwrap();
            store.set("feed", "[1,2]").await.unwrap();
        }

        let store = SqliteStore::open(&path, "u1").unwrap();
        assert_eq!(store.get("feed").await.unwrap().as_deref(), Some("[1,2]"));
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let alice = SqliteStore::open(&path, "alice").unwrap();
        alice.set("feed", "[\"a\"]").await.unwrap();
        drop(alice);

        let bob = SqliteStore::open(&path, "bob").unwrap();
        assert!(bob.get("feed").await.unwrap().is_none());
        assert!(bob.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_and_clear_scope() {
        let store = SqliteStore::in_memory("u1").unwrap();
        store.set("market", "[]").await.unwrap();
        store.set("feed", "[]").await.unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["feed", "market"]);
        assert_eq!(store.size_bytes().await.unwrap(), 4);

        assert_eq!(store.clear_scope().await.unwrap(), 2);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_clears_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let store = SqliteStore::open(&path, "u1").unwrap();
            store.set("feed", "[]").await.unwrap();
        }

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "UPDATE store_metadata SET value = ? WHERE key = 'version'",
                params![STORE_VERSION + 1],
            )
            .unwrap();
        }

        let store = SqliteStore::open(&path, "u1").unwrap();
        assert!(store.get("feed").await.unwrap().is_none());
    }
}
