use async_trait::async_trait;
use log::info;
use std::fs;
use std::path::Path;

use super::{ Item, ItemQuery, ItemStore, StoreError };

/// Items held in process. Used for local runs and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryItemStore {
    items: Vec<Item>,
}

impl MemoryItemStore {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let items: Vec<Item> = serde_json
            ::from_str(&raw)
            .map_err(|e| StoreError::Decode(format!("{}: {}", path.display(), e)))?;
        info!("Loaded {} seed items from {}", items.len(), path.display());
        Ok(Self::new(items))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn matches_text(item: &Item, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    item.title.to_lowercase().contains(needle) ||
        item.description
            .as_deref()
            .map(|d| d.to_lowercase().contains(needle))
            .unwrap_or(false)
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn search(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        let needle = query.text.to_lowercase();
        let mut hits: Vec<&Item> = self.items
            .iter()
            .filter(|item| !item.is_deleted())
            .filter(|item| query.item_type.map_or(true, |t| item.item_type == t))
            .filter(|item| matches_text(item, &needle))
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(hits.into_iter().take(query.limit).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
