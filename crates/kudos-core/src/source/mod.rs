//! Data sources for cache categories
//!
//! Each category maps to exactly one fetch. The cache never interprets the
//! returned payload.

pub mod http;

pub use http::ApiClient;

use crate::error::FetchError;
use async_trait::async_trait;
use kudos_types::Category;
use serde_json::Value;

/// Fetches the current payload of a category
#[async_trait]
pub trait DataSource: Send + Sync {
    /// `param` is the runtime argument of parameterized categories (the user
    /// id for history) and ignored by the others.
    async fn fetch(&self, category: Category, param: Option<&str>) -> Result<Value, FetchError>;
}
