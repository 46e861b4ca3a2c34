//! Postgres + pgvector memory store

use super::store::{MemoryEntry, MemoryStore, ENTRY_COUNT_KEY};
use super::vector::{from_pgvector, to_pgvector};
use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "id, user_id, topic, content, embedding::text AS embedding, metadata, created_at";

pub struct PgMemoryStore {
    pool: PgPool,
    dimension: usize,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgMemoryStore {
    pub fn new(pool: PgPool, dimension: usize) -> Self {
        Self {
            pool,
            dimension,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in schema_sql(self.dimension) {
                    sqlx::query(&statement).execute(&self.pool).await?;
                }
                info!(dimension = self.dimension, "Memory store schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize memory store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

pub(crate) fn schema_sql(dimension: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        format!(
            "CREATE TABLE IF NOT EXISTS agent_memories (\
             id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
             user_id UUID NOT NULL, \
             topic TEXT, \
             content TEXT NOT NULL, \
             embedding vector({}), \
             metadata JSONB, \
             created_at TIMESTAMPTZ DEFAULT NOW())",
            dimension
        ),
        "CREATE INDEX IF NOT EXISTS idx_agent_memories_user_topic \
         ON agent_memories (user_id, topic, created_at DESC)"
            .to_string(),
    ]
}

fn embedding_param(embedding: &[f32]) -> Option<String> {
    if embedding.is_empty() {
        None
    } else {
        Some(to_pgvector(embedding))
    }
}

fn decode_entry(row: &PgRow) -> Result<MemoryEntry> {
    let embedding: Option<String> = row.try_get("embedding")?;
    let metadata: Option<Value> = row.try_get("metadata")?;
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at")?;

    Ok(MemoryEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        topic: row.try_get("topic")?,
        content: row.try_get("content")?,
        embedding: embedding
            .as_deref()
            .and_then(from_pgvector)
            .unwrap_or_default(),
        metadata: match metadata {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        },
        created_at: created_at.unwrap_or_else(Utc::now),
    })
}

#[async_trait::async_trait]
impl MemoryStore for PgMemoryStore {
    async fn latest(&self, user_id: Uuid, topic: Option<&str>) -> Result<Option<MemoryEntry>> {
        self.ensure_schema_if_needed().await?;

        let sql = format!(
            "SELECT {} FROM agent_memories \
             WHERE user_id = $1 AND topic IS NOT DISTINCT FROM $2 \
             ORDER BY created_at DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_entry).transpose()
    }

    async fn insert(&self, entry: MemoryEntry) -> Result<MemoryEntry> {
        self.ensure_schema_if_needed().await?;

        let sql = format!(
            "INSERT INTO agent_memories (id, user_id, topic, content, embedding, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5::vector, $6, $7) RETURNING {}",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(entry.topic.as_deref())
            .bind(&entry.content)
            .bind(embedding_param(&entry.embedding))
            .bind(Value::Object(entry.metadata.clone()))
            .bind(entry.created_at)
            .fetch_one(&self.pool)
            .await?;

        decode_entry(&row)
    }

    async fn update_if_count(&self, entry: &MemoryEntry, expected_count: u32) -> Result<bool> {
        self.ensure_schema_if_needed().await?;

        let sql = format!(
            "UPDATE agent_memories SET content = $1, embedding = $2::vector, metadata = $3 \
             WHERE id = $4 AND user_id = $5 \
             AND COALESCE((metadata->>'{}')::int, 1) = $6",
            ENTRY_COUNT_KEY
        );
        let result = sqlx::query(&sql)
            .bind(&entry.content)
            .bind(embedding_param(&entry.embedding))
            .bind(Value::Object(entry.metadata.clone()))
            .bind(entry.id)
            .bind(entry.user_id)
            .bind(expected_count as i32)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn nearest(
        &self,
        user_id: Uuid,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        self.ensure_schema_if_needed().await?;

        let sql = format!(
            "SELECT {} FROM agent_memories \
             WHERE user_id = $1 AND embedding IS NOT NULL \
             ORDER BY embedding <=> $2::vector LIMIT $3",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(to_pgvector(embedding))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_uses_configured_dimension() {
        let statements = schema_sql(768);
        assert_eq!(statements[0], "CREATE EXTENSION IF NOT EXISTS vector");
        assert!(statements[1].contains("embedding vector(768)"));
        assert!(statements[1].contains("metadata JSONB"));
    }

    #[test]
    fn test_empty_embedding_binds_null() {
        assert_eq!(embedding_param(&[]), None);
        assert_eq!(embedding_param(&[1.0, 2.5]), Some("[1,2.5]".to_string()));
    }
}
