mod memory;
mod supabase;

pub use memory::MemoryItemStore;
pub use supabase::SupabaseItemStore;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::info;
use serde::{ Deserialize, Serialize };
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::cli::Args;

/// Hard ceiling on rows handed back to the model.
pub const MAX_SEARCH_RESULTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Lost,
    Found,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Lost => "LOST",
            ItemType::Found => "FOUND",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOST" => Ok(ItemType::Lost),
            "FOUND" => Ok(ItemType::Found),
            other => Err(format!("unknown item type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemCategory {
    Electronics,
    Clothing,
    IdCards,
    Keys,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Open,
    Claimed,
    Resolved,
}

/// A row of the `items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub category: ItemCategory,
    pub status: ItemStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub date_incident: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            title: self.title.clone(),
            description: self.description.clone(),
            item_type: self.item_type,
            category: self.category,
            status: self.status,
            location: self.location.clone(),
            created_at: self.created_at,
        }
    }
}

/// The fields of an item the assistant is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub category: ItemCategory,
    pub status: ItemStatus,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    /// Case-insensitive substring matched against title and description.
    /// Empty matches everything.
    pub text: String,
    pub item_type: Option<ItemType>,
    pub limit: usize,
}

impl ItemQuery {
    pub fn new(text: impl Into<String>, item_type: Option<ItemType>, limit: usize) -> Self {
        Self {
            text: text.into().trim().to_string(),
            item_type,
            limit: limit.clamp(1, MAX_SEARCH_RESULTS),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request to item store failed: {0}")] Request(#[from] reqwest::Error),
    #[error("item store returned {status}: {message}")] Backend {
        status: u16,
        message: String,
    },
    #[error("invalid item data: {0}")] Decode(String),
    #[error("item store misconfigured: {0}")] Config(String),
    #[error("failed to read item seed file: {0}")] Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Non-deleted items matching `query`, newest first, at most `query.limit`.
    async fn search(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError>;

    fn name(&self) -> &'static str;
}

pub fn create_item_store(args: &Args) -> Result<Arc<dyn ItemStore>, Box<dyn Error + Send + Sync>> {
    match args.item_store_type.to_lowercase().as_str() {
        "supabase" => {
            let url = args.supabase_url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| StoreError::Config("SUPABASE_URL is required".into()))?;
            let key = args.supabase_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| StoreError::Config("SUPABASE_KEY is required".into()))?;
            let store = SupabaseItemStore::new(&url, &key, &args.items_table)?;
            Ok(Arc::new(store))
        }
        "memory" => {
            let store = match &args.items_seed_path {
                Some(path) => MemoryItemStore::from_json_file(path)?,
                None => MemoryItemStore::default(),
            };
            Ok(Arc::new(store))
        }
        other =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported item store type: {}", other)
                    )
                )
            ),
    }
}

pub fn initialize_item_store(args: &Args) -> Result<Arc<dyn ItemStore>, Box<dyn Error + Send + Sync>> {
    let store = create_item_store(args)?;
    info!("Item search backed by: {}", store.name());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_rows_deserialize_from_backend_json() {
        let item: Item = serde_json::from_str(
            r#"{
                "id": "7f0c",
                "title": "Blue wallet",
                "description": null,
                "type": "LOST",
                "category": "ID_CARDS",
                "status": "OPEN",
                "location": "Library",
                "user_id": "u1",
                "image_url": null,
                "created_at": "2025-03-01T10:15:00.123456+00:00",
                "updated_at": "2025-03-01T10:15:00+00:00"
            }"#
        ).unwrap();
        assert_eq!(item.item_type, ItemType::Lost);
        assert_eq!(item.category, ItemCategory::IdCards);
        assert!(!item.is_deleted());

        let summary = serde_json::to_value(item.summary()).unwrap();
        assert_eq!(summary["type"], "LOST");
        assert!(summary.get("user_id").is_none());
        assert!(summary.get("image_url").is_none());
    }

    #[test]
    fn query_limit_is_clamped() {
        assert_eq!(ItemQuery::new(" keys ", None, 50).limit, MAX_SEARCH_RESULTS);
        assert_eq!(ItemQuery::new("keys", None, 0).limit, 1);
        assert_eq!(ItemQuery::new(" keys ", None, 3).text, "keys");
    }

    #[test]
    fn item_type_parses_loosely() {
        assert_eq!("lost".parse::<ItemType>(), Ok(ItemType::Lost));
        assert_eq!(" FOUND".parse::<ItemType>(), Ok(ItemType::Found));
        assert!("stolen".parse::<ItemType>().is_err());
    }
}
