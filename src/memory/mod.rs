//! Long-term agent memory
//!
//! After a turn the recent dialogue is summarized into `User Facts:` /
//! `Follow-ups:` sections and folded into the newest entry for the user's
//! topic until that entry reaches the merge cap, after which a fresh entry
//! is started. Retrieval is nearest-neighbour over entry embeddings.
//!
//! Merges for the same (user, topic) are serialized in-process, and the
//! store applies them with a compare-and-swap on the entry count so two
//! processes cannot silently overwrite each other.

pub mod pg;
pub mod sections;
pub mod store;
pub mod summarizer;
pub mod vector;

pub use pg::PgMemoryStore;
pub use sections::{MemorySections, NO_MEMORY};
pub use store::{InMemoryMemoryStore, MemoryEntry, MemoryStore};
pub use summarizer::Summarizer;

use crate::config::DEFAULT_MEMORY_MERGE_CAP;
use crate::error::OrchestrationError;
use crate::llm::{ChatModel, Embedder};
use crate::models::Message;
use crate::Result;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_TOPIC: &str = "conversation";
const MEMORY_SOURCE: &str = "chat";
const CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    /// Nothing worth remembering in the conversation.
    Skipped,
    Created { id: Uuid },
    Merged { id: Uuid, entry_count: u32 },
    /// Every fact was already known; nothing written.
    Unchanged { id: Uuid },
}

type MergeKey = (Uuid, String);

pub struct MemoryEngine {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Summarizer,
    topic: String,
    merge_cap: u32,
    merge_locks: Mutex<HashMap<MergeKey, Arc<Mutex<()>>>>,
}

impl MemoryEngine {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        summary_model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            embedder,
            summarizer: Summarizer::new(summary_model),
            topic: DEFAULT_TOPIC.to_string(),
            merge_cap: DEFAULT_MEMORY_MERGE_CAP,
            merge_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_merge_cap(mut self, cap: u32) -> Self {
        self.merge_cap = cap.max(1);
        self
    }

    /// Summarize `messages` and fold the result into the user's memory.
    pub async fn consolidate(
        &self,
        user_id: Uuid,
        messages: &[Message],
    ) -> Result<ConsolidationOutcome> {
        let Some(summary) = self.summarizer.summarize(messages).await? else {
            return Ok(ConsolidationOutcome::Skipped);
        };
        let incoming = MemorySections::parse(&summary);
        if incoming.is_empty() {
            return Ok(ConsolidationOutcome::Skipped);
        }

        let message_count =
            summarizer::recent_dialogue(messages, summarizer::RECENT_DIALOGUE_MESSAGES).len();

        let key = (user_id, self.topic.clone());
        let lock = {
            let mut locks = self.merge_locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };

        let outcome = {
            let _guard = lock.lock().await;
            self.merge_or_insert(user_id, &incoming, message_count).await
        };

        let mut locks = self.merge_locks.lock().await;
        // map + our handle; nobody else is waiting on it
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        drop(lock);
        drop(locks);

        outcome
    }

    async fn merge_or_insert(
        &self,
        user_id: Uuid,
        incoming: &MemorySections,
        message_count: usize,
    ) -> Result<ConsolidationOutcome> {
        let topic = Some(self.topic.as_str());

        for attempt in 1..=CAS_ATTEMPTS {
            let latest = self.store.latest(user_id, topic).await?;

            let Some(mut entry) = latest.filter(|e| e.entry_count() < self.merge_cap) else {
                let mut fresh = MemorySections::default();
                fresh.merge(incoming);
                let content = fresh.render();
                let embedding = self.embedder.embed(&content).await?;
                let mut metadata = base_metadata(message_count);
                metadata.insert(store::ENTRY_COUNT_KEY.to_string(), json!(1));

                let created = self
                    .store
                    .insert(MemoryEntry::new(user_id, topic, content, embedding, metadata))
                    .await?;
                info!(user_id = %user_id, memory_id = %created.id, "Memory entry created");
                return Ok(ConsolidationOutcome::Created { id: created.id });
            };

            let mut merged = MemorySections::parse(&entry.content);
            if !merged.merge(incoming) {
                debug!(user_id = %user_id, memory_id = %entry.id, "Memory unchanged");
                return Ok(ConsolidationOutcome::Unchanged { id: entry.id });
            }

            let expected = entry.entry_count();
            entry.content = merged.render();
            entry.embedding = self.embedder.embed(&entry.content).await?;
            entry.metadata.extend(base_metadata(message_count));
            entry.set_entry_count(expected + 1);

            if self.store.update_if_count(&entry, expected).await? {
                info!(
                    user_id = %user_id,
                    memory_id = %entry.id,
                    entry_count = expected + 1,
                    "Memory entry merged"
                );
                return Ok(ConsolidationOutcome::Merged {
                    id: entry.id,
                    entry_count: expected + 1,
                });
            }

            debug!(user_id = %user_id, memory_id = %entry.id, attempt, "Memory merge conflicted, retrying");
        }

        Err(OrchestrationError::MemoryError(format!(
            "memory merge for user {} kept conflicting after {} attempts",
            user_id, CAS_ATTEMPTS
        )))
    }

    /// Entries nearest to `query`. A blank query or zero limit returns none.
    pub async fn retrieve(
        &self,
        user_id: Uuid,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        if embedding.is_empty() {
            return Ok(Vec::new());
        }
        self.store.nearest(user_id, &embedding, limit).await
    }

    /// Consolidate off the request path. Failures are logged, never raised.
    pub fn schedule(self: &Arc<Self>, user_id: Uuid, messages: Vec<Message>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.consolidate(user_id, &messages).await {
                Ok(outcome) => debug!(user_id = %user_id, ?outcome, "Memory consolidation finished"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Failed to persist conversation memory"),
            }
        })
    }
}

fn base_metadata(message_count: usize) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("source".to_string(), json!(MEMORY_SOURCE));
    metadata.insert("message_count".to_string(), json!(message_count));
    metadata
}

/// System message seeding a turn with recalled memories.
pub fn format_memory_message(entries: &[MemoryEntry]) -> Option<Message> {
    if entries.is_empty() {
        return None;
    }
    let lines: Vec<String> = entries
        .iter()
        .map(|e| match &e.topic {
            Some(topic) => format!("- [{}] {}", topic, e.content),
            None => format!("- {}", e.content),
        })
        .collect();
    Some(Message::system(format!(
        "Relevant previous context:\n{}",
        lines.join("\n")
    )))
}
