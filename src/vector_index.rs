//! Storage for document embeddings.
//!
//! Entries are keyed by the document's embedding id; an upsert with an
//! existing id replaces the previous vector, text, and metadata.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::embedding::vec_to_blob;
use crate::models::VectorEntry;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces the entry with `entry.id`.
    async fn upsert(&self, entry: &VectorEntry) -> Result<()>;
}

/// Vector index backed by the `vector_entries` table.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> Result<()> {
        let metadata_json =
            serde_json::to_string(&entry.metadata).context("Failed to encode vector metadata")?;
        let now = chrono::Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO vector_entries (id, embedding, dims, text, metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                embedding = excluded.embedding,
                dims = excluded.dims,
                text = excluded.text,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.id)
        .bind(vec_to_blob(&entry.embedding))
        .bind(entry.embedding.len() as i64)
        .bind(&entry.text)
        .bind(&metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert vector entry {}", entry.id))?;

        Ok(())
    }
}

/// Process-local index, useful for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, VectorEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str) -> Option<VectorEntry> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::blob_to_vec;
    use crate::models::VectorMetadata;
    use crate::{db, migrate};
    use sqlx::Row;
    use tempfile::TempDir;

    fn entry(id: &str, text: &str, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.to_string(),
            embedding,
            text: text.to_string(),
            metadata: VectorMetadata {
                source: format!("/tmp/{}.txt", id),
                name: format!("{}.txt", id),
                kind: "txt".to_string(),
                timestamp: "2026-01-01T00:00:00+00:00".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn sqlite_upsert_is_last_write_wins() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("vectors.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool.clone());

        index.upsert(&entry("doc_a", "old", vec![1.0, 2.0])).await.unwrap();
        index
            .upsert(&entry("doc_a", "new", vec![3.0, 4.0, 5.0]))
            .await
            .unwrap();

        let rows = sqlx::query("SELECT embedding, dims, text, metadata_json FROM vector_entries")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let blob: Vec<u8> = rows[0].get("embedding");
        assert_eq!(blob_to_vec(&blob), vec![3.0, 4.0, 5.0]);
        assert_eq!(rows[0].get::<i64, _>("dims"), 3);
        assert_eq!(rows[0].get::<String, _>("text"), "new");
        let metadata: serde_json::Value =
            serde_json::from_str(&rows[0].get::<String, _>("metadata_json")).unwrap();
        assert_eq!(metadata["type"], "txt");
        assert_eq!(metadata["name"], "doc_a.txt");
    }

    #[tokio::test]
    async fn in_memory_upsert_replaces() {
        let index = InMemoryVectorIndex::new();
        index.upsert(&entry("doc_a", "one", vec![1.0])).await.unwrap();
        index.upsert(&entry("doc_a", "two", vec![2.0])).await.unwrap();
        assert_eq!(index.len().await, 1);
        assert_eq!(index.get("doc_a").await.unwrap().text, "two");
    }
}
