//! Configuration for kudos
//!
//! Loaded from `config.toml`; every field has a default so an empty or
//! missing file yields a working setup.

use crate::error::ConfigError;
use kudos_types::Category;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KudosConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
}

/// REST API connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the rewards API
    pub base_url: String,

    /// Host init-data blob sent with every request
    pub init_data: Option<String>,

    pub user_agent: String,

    /// TCP connect timeout
    pub connect_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            init_data: None,
            user_agent: format!("kudos/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_ms: 5_000,
        }
    }
}

/// Cache behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prepended to storage keys (`<prefix>_feed`)
    pub key_prefix: String,

    /// Upper bound for a single category fetch
    pub fetch_timeout_ms: u64,

    /// Upper bound for a single storage call
    pub storage_timeout_ms: u64,

    /// Largest serialized value accepted by storage. Unset by default; set
    /// it to the host's quota (4096 for Telegram cloud storage) when the
    /// backend enforces one.
    pub max_value_bytes: Option<usize>,

    /// Categories fetched by `preload_initial_data`
    pub preload: Vec<Category>,

    /// Unparameterized categories kept out of persistent storage
    pub session_only: Vec<Category>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            fetch_timeout_ms: 10_000,
            storage_timeout_ms: 5_000,
            max_value_bytes: None,
            preload: vec![Category::Feed, Category::Leaderboard, Category::Market],
            session_only: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }
}

/// Persistent storage location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// User/device scope inside the database
    pub scope: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            scope: "default".to_string(),
        }
    }
}

/// `<data dir>/kudos/cache.db`, or `./kudos-cache.db` when no data dir exists
pub fn default_storage_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("kudos").join("cache.db"))
        .unwrap_or_else(|| PathBuf::from("kudos-cache.db"))
}

/// `<config dir>/kudos/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("kudos").join("config.toml"))
}

impl KudosConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: KudosConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content, path)
    }

    /// Load an explicit file, else the default file if present, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Loading default config file");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Reject configurations the cache cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url must not be empty"));
        }
        if self.cache.fetch_timeout_ms == 0 {
            return Err(invalid("cache.fetch_timeout_ms must be positive"));
        }
        if self.cache.storage_timeout_ms == 0 {
            return Err(invalid("cache.storage_timeout_ms must be positive"));
        }
        if self.cache.max_value_bytes == Some(0) {
            return Err(invalid("cache.max_value_bytes must be positive when set"));
        }
        if self.storage.scope.trim().is_empty() {
            return Err(invalid("storage.scope must not be empty"));
        }
        if let Some(c) = self.cache.preload.iter().find(|c| c.is_parameterized()) {
            return Err(invalid(format!(
                "cache.preload cannot contain '{}': it needs a parameter",
                c
            )));
        }
        if let Some(c) = self.cache.session_only.iter().find(|c| c.is_parameterized()) {
            return Err(invalid(format!(
                "cache.session_only cannot contain '{}': it is always session-scoped",
                c
            )));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = KudosConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.preload.len(), 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [api]
            base_url = "https://kudos.example.com/api"

            [cache]
            key_prefix = "u42"
            session_only = ["leaderboard"]
        "#;
        let config = KudosConfig::from_toml(toml, Path::new("config.toml")).unwrap();

        assert_eq!(config.api.base_url, "https://kudos.example.com/api");
        assert_eq!(config.cache.key_prefix, "u42");
        assert_eq!(config.cache.session_only, vec![Category::Leaderboard]);
        assert_eq!(config.cache.max_value_bytes, None);
        assert_eq!(config.storage.scope, "default");
    }

    #[test]
    fn test_value_limit_is_opt_in() {
        let toml = r#"
            [cache]
            max_value_bytes = 4096
        "#;
        let config = KudosConfig::from_toml(toml, Path::new("config.toml")).unwrap();
        assert_eq!(config.cache.max_value_bytes, Some(4_096));

        let toml = r#"
            [cache]
            max_value_bytes = 0
        "#;
        assert!(KudosConfig::from_toml(toml, Path::new("config.toml")).is_err());
    }

    #[test]
    fn test_rejects_parameterized_preload() {
        let toml = r#"
            [cache]
            preload = ["feed", "history"]
        "#;
        let err = KudosConfig::from_toml(toml, Path::new("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains("history"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = KudosConfig::default();
        config.cache.fetch_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nscope = \"device-1\"\n").unwrap();

        let config = KudosConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.storage.scope, "device-1");
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let dir = tempdir().unwrap();
        let err = KudosConfig::load_or_default(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_toml() {
        let err = KudosConfig::from_toml("[cache\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
