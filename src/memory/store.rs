//! Long-term memory persistence
//!
//! Entries are summaries of past conversations, one stream per
//! (user, topic). The store only appends or compare-and-swaps; merge logic
//! lives in the engine.

use super::vector::cosine_similarity;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const ENTRY_COUNT_KEY: &str = "entry_count";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub topic: Option<String>,
    pub content: String,
    /// Empty when the entry was stored without an embedding.
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        user_id: Uuid,
        topic: Option<&str>,
        content: String,
        embedding: Vec<f32>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            topic: topic.map(str::to_string),
            content,
            embedding,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Number of summaries folded into this entry. Missing means 1.
    pub fn entry_count(&self) -> u32 {
        self.metadata
            .get(ENTRY_COUNT_KEY)
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(1)
    }

    pub fn set_entry_count(&mut self, count: u32) {
        self.metadata
            .insert(ENTRY_COUNT_KEY.to_string(), Value::from(count));
    }
}

/// Trait for memory persistence
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Most recently created entry for (user, topic).
    async fn latest(&self, user_id: Uuid, topic: Option<&str>) -> Result<Option<MemoryEntry>>;

    async fn insert(&self, entry: MemoryEntry) -> Result<MemoryEntry>;

    /// Replace content, embedding and metadata of `entry` only if the stored
    /// entry count still equals `expected_count`. `false` means another
    /// writer got there first and nothing was written.
    async fn update_if_count(&self, entry: &MemoryEntry, expected_count: u32) -> Result<bool>;

    /// Up to `limit` of the user's entries closest to `embedding`.
    async fn nearest(&self, user_id: Uuid, embedding: &[f32], limit: usize)
        -> Result<Vec<MemoryEntry>>;
}

/// In-memory memory store for development and tests
#[derive(Clone, Default)]
pub struct InMemoryMemoryStore {
    entries: Arc<RwLock<Vec<MemoryEntry>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries_for(&self, user_id: Uuid) -> Vec<MemoryEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn latest(&self, user_id: Uuid, topic: Option<&str>) -> Result<Option<MemoryEntry>> {
        let entries = self.entries.read().await;
        // later insertions win ties on created_at
        let latest = entries
            .iter()
            .filter(|e| e.user_id == user_id && e.topic.as_deref() == topic)
            .fold(None::<&MemoryEntry>, |best, e| match best {
                Some(b) if b.created_at > e.created_at => Some(b),
                _ => Some(e),
            });
        Ok(latest.cloned())
    }

    async fn insert(&self, entry: MemoryEntry) -> Result<MemoryEntry> {
        let mut entries = self.entries.write().await;
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn update_if_count(&self, entry: &MemoryEntry, expected_count: u32) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let Some(stored) = entries
            .iter_mut()
            .find(|e| e.id == entry.id && e.user_id == entry.user_id)
        else {
            return Ok(false);
        };

        if stored.entry_count() != expected_count {
            return Ok(false);
        }

        stored.content = entry.content.clone();
        stored.embedding = entry.embedding.clone();
        stored.metadata = entry.metadata.clone();
        Ok(true)
    }

    async fn nearest(
        &self,
        user_id: Uuid,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &MemoryEntry)> = entries
            .iter()
            .filter(|e| e.user_id == user_id && !e.embedding.is_empty())
            .map(|e| (cosine_similarity(&e.embedding, embedding), e))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(user: Uuid, topic: &str, content: &str, embedding: Vec<f32>) -> MemoryEntry {
        MemoryEntry::new(user, Some(topic), content.to_string(), embedding, Map::new())
    }

    #[test]
    fn test_entry_count_defaults_to_one() {
        let mut e = entry(Uuid::new_v4(), "conversation", "x", vec![]);
        assert_eq!(e.entry_count(), 1);

        e.set_entry_count(3);
        assert_eq!(e.metadata.get(ENTRY_COUNT_KEY), Some(&json!(3)));
        assert_eq!(e.entry_count(), 3);
    }

    #[tokio::test]
    async fn test_latest_is_per_user_and_topic() {
        let store = InMemoryMemoryStore::new();
        let user = Uuid::new_v4();

        store.insert(entry(user, "conversation", "old", vec![])).await.unwrap();
        store.insert(entry(user, "conversation", "new", vec![])).await.unwrap();
        store.insert(entry(user, "tax", "other topic", vec![])).await.unwrap();
        store
            .insert(entry(Uuid::new_v4(), "conversation", "other user", vec![]))
            .await
            .unwrap();

        let latest = store.latest(user, Some("conversation")).await.unwrap().unwrap();
        assert_eq!(latest.content, "new");
        assert!(store.latest(user, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_is_compare_and_swap() {
        let store = InMemoryMemoryStore::new();
        let user = Uuid::new_v4();
        let mut stored = store.insert(entry(user, "conversation", "v1", vec![])).await.unwrap();

        stored.content = "v2".into();
        stored.set_entry_count(2);
        assert!(store.update_if_count(&stored, 1).await.unwrap());

        stored.content = "stale".into();
        assert!(!store.update_if_count(&stored, 1).await.unwrap());

        let latest = store.latest(user, Some("conversation")).await.unwrap().unwrap();
        assert_eq!(latest.content, "v2");
        assert_eq!(latest.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_nearest_orders_by_similarity() {
        let store = InMemoryMemoryStore::new();
        let user = Uuid::new_v4();

        store.insert(entry(user, "t", "east", vec![1.0, 0.0])).await.unwrap();
        store.insert(entry(user, "t", "north", vec![0.0, 1.0])).await.unwrap();
        store.insert(entry(user, "t", "no vector", vec![])).await.unwrap();
        store
            .insert(entry(Uuid::new_v4(), "t", "someone else", vec![1.0, 0.0]))
            .await
            .unwrap();

        let found = store.nearest(user, &[0.9, 0.1], 5).await.unwrap();
        let contents: Vec<&str> = found.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["east", "north"]);

        let found = store.nearest(user, &[0.9, 0.1], 1).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
