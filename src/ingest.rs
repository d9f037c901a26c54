//! Document ingestion: extract → identify → store → embed → index.
//!
//! The relational row and the vector entry are written as a two-phase pair.
//! The row is first stored as `pending`; it becomes `committed` only after
//! the vector upsert succeeds. If anything fails in between, the pending row
//! is removed and whatever rows it displaced are put back, so the
//! `documents` table never lists a file without a vector.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::embedding::Embedder;
use crate::extract::{self, DocumentKind, Extraction};
use crate::models::{millis_to_utc, StoredDocument, VectorEntry, VectorMetadata};
use crate::ocr::OcrEngine;
use crate::vector_index::VectorIndex;

const STATUS_PENDING: &str = "pending";
const STATUS_COMMITTED: &str = "committed";

/// What happened to an ingested file, for the user.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestReport {
    Stored(DocumentSummary),
    FileNotFound,
    /// PDF with no text layer. Nothing is stored.
    ScannedPdf,
    /// Extraction produced no text. Nothing is stored.
    NoText,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub name: String,
    pub chars: usize,
    /// Upper-cased extension, e.g. `PDF`.
    pub kind: String,
    pub embedding_id: String,
    pub content: String,
}

impl IngestReport {
    pub fn message(&self) -> String {
        match self {
            IngestReport::Stored(summary) => summary.message(),
            IngestReport::FileNotFound => {
                "Oops! I couldn't find that file. Could you double-check the path?".to_string()
            }
            IngestReport::ScannedPdf => "This appears to be a scanned PDF. I can't extract text from images, but you could try OCR software.".to_string(),
            IngestReport::NoText => "Hmm, I couldn't extract any text from this document. It might be an image-based PDF or the file might be corrupted.".to_string(),
        }
    }

    pub fn stored(&self) -> Option<&DocumentSummary> {
        match self {
            IngestReport::Stored(summary) => Some(summary),
            _ => None,
        }
    }
}

impl DocumentSummary {
    pub fn message(&self) -> String {
        format!(
            "📄 Document: {}\n📝 Characters: {}\n📂 Type: {}\n✅ Successfully processed and stored!",
            self.name,
            group_thousands(self.chars),
            self.kind
        )
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("embedding failed: {0}")]
    Embed(String),
    #[error("vector index update failed: {0}")]
    Index(String),
}

impl IngestError {
    pub fn message(&self) -> String {
        format!(
            "I encountered an issue while processing this document. Here's what happened:\n{}",
            self
        )
    }
}

/// A row displaced by `INSERT OR REPLACE`, kept so it can be restored.
#[derive(Debug, Clone)]
struct DocumentRow {
    id: i64,
    filename: String,
    content: String,
    embedding_id: String,
    status: String,
    timestamp: i64,
}

pub struct IngestPipeline {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    ocr: Arc<dyn OcrEngine>,
}

impl IngestPipeline {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            pool,
            embedder,
            index,
            ocr,
        }
    }

    pub async fn ingest(
        &self,
        path: &Path,
        content_type: Option<&str>,
    ) -> Result<IngestReport, IngestError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(IngestReport::FileNotFound);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let kind = DocumentKind::detect(path, content_type);

        let text = match extract::extract(path, kind, self.ocr.as_ref()).await {
            Ok(Extraction::Text(text)) => text,
            Ok(Extraction::ScannedPdf) => return Ok(IngestReport::ScannedPdf),
            Err(e) => {
                tracing::error!(file = %name, error = %e, "text extraction failed");
                String::new()
            }
        };
        if text.trim().is_empty() {
            return Ok(IngestReport::NoText);
        }

        let embedding_id = content_id(&text);
        let ext = extract::extension(path);

        let (row_id, displaced) = self.insert_pending(&name, &text, &embedding_id).await?;

        if let Err(e) = self.index_and_commit(row_id, path, &name, &ext, &text, &embedding_id).await {
            tracing::error!(file = %name, error = %e, "document ingestion failed, rolling back");
            if let Err(rollback_err) = self.rollback(row_id, &displaced).await {
                tracing::error!(file = %name, error = %rollback_err, "rollback failed");
            }
            return Err(e);
        }

        tracing::info!(file = %name, chars = text.chars().count(), id = %embedding_id, "document stored");

        Ok(IngestReport::Stored(DocumentSummary {
            name,
            chars: text.chars().count(),
            kind: ext.to_uppercase(),
            embedding_id,
            content: text,
        }))
    }

    /// Snapshots the rows sharing this filename or content id, then writes
    /// the new row as pending.
    async fn insert_pending(
        &self,
        name: &str,
        text: &str,
        embedding_id: &str,
    ) -> Result<(i64, Vec<DocumentRow>), IngestError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id, filename, content, embedding_id, status, timestamp FROM documents WHERE filename = ? OR embedding_id = ?",
        )
        .bind(name)
        .bind(embedding_id)
        .fetch_all(&mut *tx)
        .await?;
        let displaced = rows
            .iter()
            .map(|r| DocumentRow {
                id: r.get("id"),
                filename: r.get("filename"),
                content: r.get("content"),
                embedding_id: r.get("embedding_id"),
                status: r.get("status"),
                timestamp: r.get("timestamp"),
            })
            .collect();

        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query(
            "INSERT OR REPLACE INTO documents (filename, content, embedding_id, status, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(text)
        .bind(embedding_id)
        .bind(STATUS_PENDING)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((result.last_insert_rowid(), displaced))
    }

    async fn index_and_commit(
        &self,
        row_id: i64,
        path: &Path,
        name: &str,
        ext: &str,
        text: &str,
        embedding_id: &str,
    ) -> Result<(), IngestError> {
        let embedding = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| IngestError::Embed(e.to_string()))?;

        let entry = VectorEntry {
            id: embedding_id.to_string(),
            embedding,
            text: text.to_string(),
            metadata: VectorMetadata {
                source: path.display().to_string(),
                name: name.to_string(),
                kind: ext.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        };
        self.index
            .upsert(&entry)
            .await
            .map_err(|e| IngestError::Index(e.to_string()))?;

        let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ? AND status = ?")
            .bind(STATUS_COMMITTED)
            .bind(row_id)
            .bind(STATUS_PENDING)
            .execute(&self.pool)
            .await?;
        // Another ingest of the same file or content replaced our pending row.
        if result.rows_affected() != 1 {
            return Err(IngestError::Store(sqlx::Error::RowNotFound));
        }
        Ok(())
    }

    async fn rollback(&self, row_id: i64, displaced: &[DocumentRow]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ? AND status = ?")
            .bind(row_id)
            .bind(STATUS_PENDING)
            .execute(&mut *tx)
            .await?;
        // Superseded: the newer row owns this filename now.
        if deleted.rows_affected() == 0 {
            return tx.commit().await;
        }
        for row in displaced {
            sqlx::query(
                "INSERT OR REPLACE INTO documents (id, filename, content, embedding_id, status, timestamp) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(row.id)
            .bind(&row.filename)
            .bind(&row.content)
            .bind(&row.embedding_id)
            .bind(&row.status)
            .bind(row.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }
}

/// Committed document stored under `filename`, if any.
pub async fn find_document(
    pool: &SqlitePool,
    filename: &str,
) -> anyhow::Result<Option<StoredDocument>> {
    let row = sqlx::query(
        "SELECT filename, content, embedding_id, timestamp FROM documents WHERE filename = ? AND status = ?",
    )
    .bind(filename)
    .bind(STATUS_COMMITTED)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| StoredDocument {
        filename: r.get("filename"),
        content: r.get("content"),
        embedding_id: r.get("embedding_id"),
        timestamp: millis_to_utc(r.get("timestamp")),
    }))
}

/// `doc_` followed by the SHA-256 hex digest of the text.
pub fn content_id(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    format!("doc_{:x}", hash)
}

/// Renders `1234567` as `1,234,567`.
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
