//! REST API client
//!
//! Fetches category payloads from the rewards API. Requests are
//! authenticated with the host init-data blob; failures carry the API's
//! `{ "detail": ... }` message.

use super::DataSource;
use crate::config::ApiConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use kudos_types::Category;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Header carrying the host init-data blob
pub const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

/// HTTP data source backed by the rewards API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    init_data: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, FetchError> {
        let base_url = Url::parse(config.base_url.trim()).map_err(|e| FetchError::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidUrl {
                url: config.base_url.clone(),
                reason: "cannot be used as a base URL".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            http,
            base_url,
            init_data: config.init_data.clone().filter(|s| !s.is_empty()),
        })
    }

    /// URL serving a category
    ///
    /// | category    | path                            |
    /// |-------------|---------------------------------|
    /// | feed        | `/feed`                         |
    /// | market      | `/market/items`                 |
    /// | leaderboard | `/leaderboard`                  |
    /// | history     | `/users/{param}/transactions`   |
    pub fn endpoint(&self, category: Category, param: Option<&str>) -> Result<Url, FetchError> {
        let segments: Vec<&str> = match category {
            Category::Feed => vec!["feed"],
            Category::Market => vec!["market", "items"],
            Category::Leaderboard => vec!["leaderboard"],
            Category::History => {
                let user = param
                    .filter(|p| !p.is_empty())
                    .ok_or(FetchError::MissingParameter { category })?;
                vec!["users", user, "transactions"]
            }
        };

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "cannot be used as a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl DataSource for ApiClient {
    async fn fetch(&self, category: Category, param: Option<&str>) -> Result<Value, FetchError> {
        let url = self.endpoint(category, param)?;
        debug!(%category, %url, "Fetching");

        let mut request = self.http.get(url);
        if let Some(init_data) = &self.init_data {
            request = request.header(INIT_DATA_HEADER, init_data);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                category,
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                category,
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::Decode {
                category,
                source: e,
            })
    }
}

/// Human-readable message from an error body
///
/// The API answers errors with `{ "detail": string }`; validation errors may
/// carry a structured `detail` instead, which is rendered as JSON.
pub fn error_detail(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return "no detail".to_string();
    }

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ => body.to_string(),
    }
}
