//! Category schema: durability and storage keys

use crate::config::CacheConfig;
use kudos_types::{Category, Durability};
use std::collections::BTreeSet;

/// Per-category durability and storage key layout
#[derive(Debug, Clone, Default)]
pub struct CategorySchema {
    key_prefix: String,
    session_only: BTreeSet<Category>,
}

impl CategorySchema {
    pub fn new(key_prefix: impl Into<String>, session_only: impl IntoIterator<Item = Category>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            session_only: session_only
                .into_iter()
                .filter(|c| !c.is_parameterized())
                .collect(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.key_prefix.clone(), config.session_only.iter().copied())
    }

    /// Parameterized categories are always session-scoped; others are durable
    /// unless configured otherwise.
    pub fn durability(&self, category: Category) -> Durability {
        if self.session_only.contains(&category) {
            Durability::Session
        } else {
            category.default_durability()
        }
    }

    pub fn is_durable(&self, category: Category) -> bool {
        self.durability(category) == Durability::Durable
    }

    /// Categories mirrored to persistent storage
    pub fn durable_categories(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.into_iter().filter(|c| self.is_durable(*c))
    }

    /// Storage key of a category: its name, prefixed when a namespace is set
    pub fn storage_key(&self, category: Category) -> String {
        if self.key_prefix.is_empty() {
            category.as_str().to_string()
        } else {
            format!("{}_{}", self.key_prefix, category.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schema() {
        let schema = CategorySchema::default();
        assert_eq!(
            schema.durable_categories().collect::<Vec<_>>(),
            vec![Category::Feed, Category::Market, Category::Leaderboard]
        );
        assert_eq!(schema.storage_key(Category::Market), "market");
    }

    #[test]
    fn test_session_only_override() {
        let schema = CategorySchema::new("u42", [Category::Leaderboard]);
        assert_eq!(schema.durability(Category::Leaderboard), Durability::Session);
        assert_eq!(schema.storage_key(Category::Feed), "u42_feed");
        assert!(!schema.durable_categories().any(|c| c == Category::Leaderboard));
    }

    #[test]
    fn test_history_never_durable() {
        let schema = CategorySchema::new("", [Category::History]);
        assert!(!schema.is_durable(Category::History));
        assert_eq!(schema.durable_categories().count(), 3);
    }
}
