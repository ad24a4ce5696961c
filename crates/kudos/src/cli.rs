//! Output formatting for CLI commands

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table};
use kudos_core::{CacheEntry, Durability, RefreshOutcome};
use kudos_types::{rows, row_count, Category, FeedEvent, LeaderboardEntry, MarketItem, Transaction};
use serde_json::Value;

// ============================================================================
// Category overview
// ============================================================================

/// State of one category as shown by `warm` and `preload`
pub struct CategoryRow {
    pub category: Category,
    pub durability: Durability,
    pub entry: Option<CacheEntry>,
    pub outcome: Option<RefreshOutcome>,
}

pub fn format_category_table(rows: &[CategoryRow], now: DateTime<Utc>, no_color: bool) -> String {
    let mut table = new_table(
        &["Category", "Storage", "Status", "Rows", "Size", "Age", "Source"],
        no_color,
    );

    for row in rows {
        let storage = match row.durability {
            Durability::Durable => "durable",
            Durability::Session => "session",
        };
        let (status, color) = match &row.outcome {
            Some(RefreshOutcome::Updated) => ("updated", Color::Green),
            Some(RefreshOutcome::Failed { .. }) => ("failed", Color::Red),
            Some(RefreshOutcome::TimedOut) => ("timed out", Color::Yellow),
            None if row.entry.is_some() => ("cached", Color::Reset),
            None => ("empty", Color::DarkGrey),
        };
        let status = if no_color {
            Cell::new(status)
        } else {
            Cell::new(status).fg(color)
        };

        match &row.entry {
            Some(entry) => {
                let size = serde_json::to_string(&*entry.payload)
                    .map(|s| s.len() as u64)
                    .unwrap_or(0);
                table.add_row(vec![
                    Cell::new(row.category),
                    Cell::new(storage),
                    status,
                    Cell::new(
                        row_count(&entry.payload)
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                    Cell::new(format_size(size)),
                    Cell::new(format_age(entry.fetched_at, now)),
                    Cell::new(format!("{:?}", entry.origin).to_lowercase()),
                ]);
            }
            None => {
                table.add_row(vec![
                    Cell::new(row.category),
                    Cell::new(storage),
                    status,
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                ]);
            }
        }
    }

    table.to_string()
}

// ============================================================================
// Payloads
// ============================================================================

/// Render a payload as a table of its typed rows, or as JSON
pub fn format_payload(category: Category, payload: &Value, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(payload).unwrap_or_else(|_| "null".to_string());
    }

    let table = match category {
        Category::Feed => feed_table(&rows(payload), no_color),
        Category::Market => market_table(&rows(payload), no_color),
        Category::Leaderboard => leaderboard_table(&rows(payload), no_color),
        Category::History => history_table(&rows(payload), no_color),
    };

    match table {
        Some(table) => table.to_string(),
        None => format!("No {} entries.", category),
    }
}

fn feed_table(events: &[FeedEvent], no_color: bool) -> Option<Table> {
    if events.is_empty() {
        return None;
    }
    let mut table = new_table(&["From", "To", "Amount", "Message", "When"], no_color);
    for e in events {
        table.add_row(vec![
            e.sender_name.clone(),
            e.receiver_name.clone(),
            e.amount.to_string(),
            truncate(&e.message, 40),
            e.created_at.clone().unwrap_or_default(),
        ]);
    }
    Some(table)
}

fn market_table(items: &[MarketItem], no_color: bool) -> Option<Table> {
    if items.is_empty() {
        return None;
    }
    let mut table = new_table(&["ID", "Item", "Price", "Stock"], no_color);
    for item in items {
        table.add_row(vec![
            item.id.to_string(),
            item.name.clone(),
            item.price.to_string(),
            item.stock
                .map(|s| s.to_string())
                .unwrap_or_else(|| "∞".to_string()),
        ]);
    }
    Some(table)
}

fn leaderboard_table(entries: &[LeaderboardEntry], no_color: bool) -> Option<Table> {
    if entries.is_empty() {
        return None;
    }
    let mut table = new_table(&["#", "Name", "Points"], no_color);
    for (i, entry) in entries.iter().enumerate() {
        let position = entry.position.unwrap_or(i as u32 + 1);
        table.add_row(vec![
            position.to_string(),
            entry.name.clone(),
            entry.points.to_string(),
        ]);
    }
    Some(table)
}

fn history_table(transactions: &[Transaction], no_color: bool) -> Option<Table> {
    if transactions.is_empty() {
        return None;
    }
    let mut table = new_table(&["Type", "Amount", "With", "Message", "When"], no_color);
    for t in transactions {
        table.add_row(vec![
            t.kind.clone(),
            t.amount.to_string(),
            t.counterparty.clone().unwrap_or_default(),
            truncate(t.message.as_deref().unwrap_or_default(), 40),
            t.created_at.clone().unwrap_or_default(),
        ]);
    }
    Some(table)
}

// ============================================================================
// Helpers
// ============================================================================

fn new_table(header: &[&str], no_color: bool) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    if no_color {
        table.set_header(header.to_vec());
    } else {
        table.set_header(
            header
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
    table
}

pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1}MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1_024 {
        format!("{:.1}KB", bytes as f64 / 1_024.0)
    } else {
        format!("{}B", bytes)
    }
}

/// Relative age: "just now", "42s", "5m", "3h", "2d"
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds();
    if secs < 1 {
        "just now".to_string()
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3_600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3_600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
