//! Typed views over cached payloads
//!
//! The cache stores payloads as opaque JSON. These views exist for callers
//! that want to render them; unknown fields are ignored and missing fields
//! default so an API change never breaks a read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One transfer shown in the activity feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedEvent {
    pub id: i64,
    pub sender_name: String,
    pub receiver_name: String,
    pub amount: i64,
    pub message: String,
    pub created_at: Option<String>,
}

/// Marketplace item priced in points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketItem {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub stock: Option<i64>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

/// Leaderboard row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub name: String,
    pub points: i64,
    pub position: Option<u32>,
}

/// Entry in a user's transaction history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    pub id: i64,
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    pub amount: i64,
    pub counterparty: Option<String>,
    pub message: Option<String>,
    pub created_at: Option<String>,
}

/// Decode a list payload into typed rows.
///
/// Accepts a bare array or an object wrapping it under `items`. Rows that do
/// not decode are skipped.
pub fn rows<T: DeserializeOwned>(payload: &Value) -> Vec<T> {
    let items = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("items") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Number of rows in a list payload, `None` if the payload is not a list
pub fn row_count(payload: &Value) -> Option<usize> {
    match payload {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => map
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_from_array() {
        let payload = json!([{"id": 1, "name": "Mug", "price": 50}, {"id": 2, "name": "Hoodie", "price": 400, "stock": 3}]);
        let items: Vec<MarketItem> = rows(&payload);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Mug");
        assert_eq!(items[0].price, 50);
        assert_eq!(items[1].stock, Some(3));
    }

    #[test]
    fn test_rows_from_wrapped_object() {
        let payload = json!({"items": [{"user_id": 7, "name": "Ann", "points": 120}], "total": 1});
        let rows: Vec<LeaderboardEntry> = rows(&payload);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].points, 120);
        assert_eq!(row_count(&payload), Some(1));
    }

    #[test]
    fn test_rows_skip_malformed() {
        let payload = json!([{"id": "not-a-number"}, {"id": 3, "type": "transfer", "amount": -10}]);
        let txs: Vec<Transaction> = rows(&payload);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, "transfer");
    }

    #[test]
    fn test_row_count_scalar() {
        assert_eq!(row_count(&json!({"balance": 10})), None);
        assert_eq!(row_count(&json!([])), Some(0));
    }
}
