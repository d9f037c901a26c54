//! The chat service: one object wiring routing, history, session memory,
//! and document ingestion together.
//!
//! A turn holds its session's memory lock from routing until the memory is
//! updated, so turns within a session are serialized while different
//! sessions run concurrently. Each turn is appended to history exactly once.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SearchConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::history::HistoryStore;
use crate::ingest::{IngestPipeline, IngestReport};
use crate::llm::{create_model, LanguageModel};
use crate::memory::SessionRegistry;
use crate::models::ConversationTurn;
use crate::ocr::{create_ocr, OcrEngine};
use crate::responder::ResponseGenerator;
use crate::router::{QueryRouter, RouteOutcome};
use crate::vector_index::{SqliteVectorIndex, VectorIndex};
use crate::websearch::{self, create_search, SearchProvider};
use crate::{db, migrate};

pub const DEFAULT_SESSION: &str = "default";

/// External collaborators, resolved from config or supplied directly.
pub struct Backends {
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub ocr: Arc<dyn OcrEngine>,
    pub search: Arc<dyn SearchProvider>,
}

impl Backends {
    pub fn from_config(config: &Config, pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            model: Arc::from(create_model(&config.llm)?),
            embedder: Arc::from(create_embedder(&config.embedding)?),
            index: Arc::new(SqliteVectorIndex::new(pool.clone())),
            ocr: Arc::from(create_ocr(&config.ocr)),
            search: Arc::from(create_search(&config.search)?),
        })
    }
}

pub struct ChatService {
    history: HistoryStore,
    router: QueryRouter,
    sessions: SessionRegistry,
    pipeline: IngestPipeline,
    search: Arc<dyn SearchProvider>,
    search_config: SearchConfig,
    media_dir: PathBuf,
    max_context_chars: usize,
}

impl ChatService {
    pub fn new(pool: SqlitePool, config: &Config, backends: Backends) -> Self {
        let history = HistoryStore::new(pool.clone());
        let generator = Arc::new(ResponseGenerator::new(
            backends.model,
            Duration::from_secs(config.llm.timeout_secs),
        ));
        let router = QueryRouter::standard(
            history.clone(),
            generator,
            Some((backends.search.clone(), &config.search)),
        );
        let pipeline = IngestPipeline::new(pool, backends.embedder, backends.index, backends.ocr);

        Self {
            history,
            router,
            sessions: SessionRegistry::new(
                config.llm.memory_turns,
                config.llm.max_sessions,
                Duration::from_secs(config.llm.session_idle_secs),
            ),
            pipeline,
            search: backends.search,
            search_config: config.search.clone(),
            media_dir: config.upload.media_dir.clone(),
            max_context_chars: config.upload.max_context_chars,
        }
    }

    /// Connects to the configured database, applies migrations, and builds
    /// the configured backends.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        let backends = Backends::from_config(config, &pool)?;
        tracing::info!(
            db = %config.db.path.display(),
            llm = %config.llm.model,
            embedding = %config.embedding.provider,
            "chat service ready"
        );
        Ok(Self::new(pool, config, backends))
    }

    pub async fn chat(&self, session_id: &str, question: &str) -> String {
        self.turn(session_id, question, question).await.response
    }

    /// Stores an uploaded file, ingests it, and answers a question about it
    /// in the given session.
    pub async fn upload(
        &self,
        session_id: &str,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
        question: &str,
    ) -> Result<String> {
        let body = {
            let staged = self.stage_upload(file_name, bytes).await?;
            let result = self.pipeline.ingest(&staged.path, content_type).await;
            self.upload_context(result)
        };

        let question = question.trim();
        let prompt = if question.is_empty() {
            format!("Please analyze this document:\n{}", body)
        } else {
            format!("{}\n\nDocument content:\n{}", question, body)
        };
        let user_query = if question.is_empty() {
            format!("📎 {}", file_name)
        } else {
            question.to_string()
        };

        Ok(self.turn(session_id, &prompt, &user_query).await.response)
    }

    /// Ingests an uploaded file without starting a chat turn.
    pub async fn ingest_upload(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<String> {
        let staged = self.stage_upload(file_name, bytes).await?;
        Ok(self.ingest_message(&staged.path, content_type).await)
    }

    /// Ingests a file already on disk.
    pub async fn ingest_path(&self, path: &Path, content_type: Option<&str>) -> String {
        self.ingest_message(path, content_type).await
    }

    pub async fn history(&self, limit: i64) -> Result<Vec<ConversationTurn>> {
        self.history.recent_history(limit).await
    }

    pub async fn search(&self, query: &str) -> String {
        websearch::search(
            self.search.as_ref(),
            query,
            self.search_config.max_results,
            Duration::from_secs(self.search_config.timeout_secs),
        )
        .await
    }

    async fn turn(&self, session_id: &str, prompt: &str, user_query: &str) -> RouteOutcome {
        let memory = self.sessions.session(session_id).await;
        let mut memory = memory.lock().await;

        let outcome = self.router.route(prompt, &memory).await;
        self.history.append(user_query, &outcome.response).await;
        memory.save_context(prompt, &outcome.response);

        tracing::info!(session = session_id, rule = outcome.rule, "turn answered");
        outcome
    }

    async fn ingest_message(&self, path: &Path, content_type: Option<&str>) -> String {
        match self.pipeline.ingest(path, content_type).await {
            Ok(report) => report.message(),
            Err(e) => e.message(),
        }
    }

    fn upload_context(&self, result: Result<IngestReport, crate::ingest::IngestError>) -> String {
        match result {
            Ok(IngestReport::Stored(summary)) => format!(
                "{}\n\n{}",
                summary.message(),
                truncate_chars(&summary.content, self.max_context_chars)
            ),
            Ok(report) => report.message(),
            Err(e) => e.message(),
        }
    }

    async fn stage_upload(&self, file_name: &str, bytes: &[u8]) -> Result<StagedUpload> {
        tokio::fs::create_dir_all(&self.media_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.media_dir.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&self.media_dir)
            .context("Failed to create upload directory")?;
        let path = dir.path().join(upload_file_name(file_name));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write upload {}", path.display()))?;
        Ok(StagedUpload { _dir: dir, path })
    }
}

/// An uploaded file in its own temporary directory. Dropping it removes the
/// directory.
struct StagedUpload {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

/// Final path component of a client-supplied name.
fn upload_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_names_lose_directories() {
        assert_eq!(upload_file_name("../../etc/passwd"), "passwd");
        assert_eq!(upload_file_name("report.pdf"), "report.pdf");
        assert_eq!(upload_file_name(""), "upload");
        assert_eq!(upload_file_name(".."), "upload");
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé\n[truncated]");
    }
}
