//! Chat service and HTTP API tests with mock model, embedder, and search.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use thara_chat::chat::{Backends, ChatService};
use thara_chat::config::{parse_config, Config};
use thara_chat::embedding::Embedder;
use thara_chat::llm::{LanguageModel, LlmReply, LlmRequest};
use thara_chat::ocr::DisabledOcr;
use thara_chat::server::build_router;
use thara_chat::vector_index::InMemoryVectorIndex;
use thara_chat::websearch::{SearchHit, SearchProvider};
use thara_chat::{db, migrate};

/// Records every request and answers with a fixed reply.
#[derive(Default)]
struct RecordingModel {
    requests: Mutex<Vec<LlmRequest>>,
}

impl RecordingModel {
    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn invoke(&self, request: &LlmRequest) -> Result<LlmReply> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(LlmReply::Structured {
            text: "This is the answer".to_string(),
        })
    }
}

struct ConstantEmbedder;

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.25; 8])
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("embedding service unreachable")
    }
}

struct NoSearch;

#[async_trait]
impl SearchProvider for NoSearch {
    async fn text_search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>> {
        Ok(vec![])
    }
}

struct Fixture {
    tmp: TempDir,
    config: Config,
    model: Arc<RecordingModel>,
    service: Arc<ChatService>,
}

async fn fixture() -> Fixture {
    fixture_with_embedder(Arc::new(ConstantEmbedder)).await
}

async fn fixture_with_embedder(embedder: Arc<dyn Embedder>) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let config = parse_config(&format!(
        r#"[db]
path = "{root}/data/thara.sqlite"

[search]
enabled = true

[upload]
media_dir = "{root}/media"
max_bytes = 1024
max_context_chars = 40

[server]
bind = "127.0.0.1:0"
"#,
        root = tmp.path().display()
    ))
    .unwrap();

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let model = Arc::new(RecordingModel::default());
    let backends = Backends {
        model: model.clone(),
        embedder,
        index: Arc::new(InMemoryVectorIndex::new()),
        ocr: Arc::new(DisabledOcr),
        search: Arc::new(NoSearch),
    };
    let service = Arc::new(ChatService::new(pool, &config, backends));

    Fixture {
        tmp,
        config,
        model,
        service,
    }
}

fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[tokio::test]
async fn each_turn_is_recorded_once() {
    let f = fixture().await;
    assert!(!f.service.chat("s1", "hello").await.is_empty());
    f.service.chat("s1", "2 + 3").await;
    f.service.chat("s1", "Tell me about Rust").await;

    let turns = f.service.history(10).await.unwrap();
    let queries: Vec<&str> = turns.iter().map(|t| t.user_query.as_str()).collect();
    assert_eq!(queries, vec!["Tell me about Rust", "2 + 3", "hello"]);
    assert_eq!(turns[1].bot_response, "The result is: 5");
    assert_eq!(turns[0].bot_response, "This is the answer.");
}

#[tokio::test]
async fn sessions_keep_separate_memory() {
    let f = fixture().await;
    f.service.chat("alice", "What is ownership?").await;
    f.service.chat("bob", "What is borrowing?").await;
    f.service.chat("alice", "And lifetimes?").await;

    let requests = f.model.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].history.is_empty());
    let alice_history: Vec<&str> = requests[2]
        .history
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(alice_history, vec!["What is ownership?", "This is the answer."]);
}

#[tokio::test]
async fn repeated_question_is_answered_from_history() {
    let f = fixture().await;
    f.service.chat("s", "What is cargo?").await;
    let again = f.service.chat("s", "What is cargo?").await;
    assert_eq!(
        again,
        "I remember answering this before:\n\nThis is the answer.\n\nLet me know if you need more details!"
    );
    assert_eq!(f.model.requests().len(), 1);
}

#[tokio::test]
async fn enabled_web_search_is_routed() {
    let f = fixture().await;
    let reply = f.service.chat("s", "web search: tokio runtime").await;
    assert_eq!(
        reply,
        "I couldn't find any relevant results for that search. Maybe try different keywords?"
    );
    assert!(f.model.requests().is_empty());
}

#[tokio::test]
async fn upload_folds_document_into_question_and_cleans_up() {
    let f = fixture().await;
    let body = "Quarterly revenue grew by twelve percent while costs stayed flat.";
    let reply = f
        .service
        .upload("s", "report.txt", Some("text/plain"), body.as_bytes(), "Summarize it")
        .await
        .unwrap();
    assert_eq!(reply, "This is the answer.");

    let prompt = &f.model.requests()[0].prompt;
    assert!(prompt.contains("Summarize it\n\nDocument content:\n📄 Document: report.txt"));
    assert!(prompt.contains("Quarterly revenue grew by twelve percent\n[truncated]"));

    let turns = f.service.history(1).await.unwrap();
    assert_eq!(turns[0].user_query, "Summarize it");
    assert!(dir_is_empty(&f.config.upload.media_dir));
}

#[tokio::test]
async fn upload_without_question_uses_file_marker() {
    let f = fixture().await;
    f.service
        .upload("s", "empty.txt", Some("text/plain"), b"", "  ")
        .await
        .unwrap();

    let prompt = &f.model.requests()[0].prompt;
    assert!(prompt.contains("Please analyze this document:\nHmm, I couldn't extract any text"));
    let turns = f.service.history(1).await.unwrap();
    assert_eq!(turns[0].user_query, "📎 empty.txt");
    assert!(dir_is_empty(&f.config.upload.media_dir));
}

#[tokio::test]
async fn ingest_upload_reports_summary() {
    let f = fixture().await;
    let message = f
        .service
        .ingest_upload("notes.txt", None, b"some notes")
        .await
        .unwrap();
    assert_eq!(
        message,
        "📄 Document: notes.txt\n📝 Characters: 10\n📂 Type: TXT\n✅ Successfully processed and stored!"
    );
    assert!(f.service.history(5).await.unwrap().is_empty());
    assert!(dir_is_empty(&f.config.upload.media_dir));
}

#[tokio::test]
async fn failed_upload_ingestion_still_cleans_up() {
    let f = fixture_with_embedder(Arc::new(FailingEmbedder)).await;
    let reply = f
        .service
        .upload("s", "report.txt", Some("text/plain"), b"quarterly numbers", "What changed?")
        .await
        .unwrap();
    assert_eq!(reply, "This is the answer.");

    let prompt = &f.model.requests()[0].prompt;
    assert!(prompt.contains(
        "What changed?\n\nDocument content:\nI encountered an issue while processing this document. Here's what happened:\n"
    ));
    assert!(prompt.contains("embedding service unreachable"));
    assert!(dir_is_empty(&f.config.upload.media_dir));

    let message = f
        .service
        .ingest_upload("report.txt", Some("text/plain"), b"quarterly numbers")
        .await
        .unwrap();
    assert!(message.starts_with(
        "I encountered an issue while processing this document. Here's what happened:\n"
    ));
    assert!(dir_is_empty(&f.config.upload.media_dir));
}

// ============ HTTP ============

async fn spawn_server(f: &Fixture) -> String {
    let app = build_router(f.service.clone(), &f.config.upload);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn http_health_and_chat() {
    let f = fixture().await;
    let base = spawn_server(&f).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let chat: serde_json::Value = client
        .post(format!("{}/chat", base))
        .json(&serde_json::json!({"question": "7/2", "session_id": "web"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chat["response"], "The result is: 3.5");

    let history: serde_json::Value = client
        .get(format!("{}/history?limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["turns"][0]["user_query"], "7/2");
}

#[tokio::test]
async fn http_rejects_empty_question_with_error_envelope() {
    let f = fixture().await;
    let base = spawn_server(&f).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&serde_json::json!({"question": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "question must not be empty");
}

#[tokio::test]
async fn http_upload_validation() {
    let f = fixture().await;
    let base = spawn_server(&f).await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(b"PK\x03\x04".to_vec())
        .file_name("archive.zip")
        .mime_str("application/zip")
        .unwrap();
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(reqwest::multipart::Form::new().part("document", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unsupported content type"));

    let part = reqwest::multipart::Part::bytes(vec![b'a'; 2048])
        .file_name("big.txt")
        .mime_str("text/plain")
        .unwrap();
    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(reqwest::multipart::Form::new().part("document", part))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/upload", base))
        .multipart(reqwest::multipart::Form::new().text("question", "hi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn http_uploads_succeed() {
    let f = fixture().await;
    let base = spawn_server(&f).await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(b"hello upload".to_vec())
        .file_name("hello.txt")
        .mime_str("text/plain")
        .unwrap();
    let debug: serde_json::Value = client
        .post(format!("{}/api/debug-upload", base))
        .multipart(reqwest::multipart::Form::new().part("document", part))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(debug["name"], "hello.txt");
    assert_eq!(debug["size"], 12);
    assert_eq!(debug["received"], true);

    let part = reqwest::multipart::Part::bytes(b"hello upload".to_vec())
        .file_name("hello.txt")
        .mime_str("text/plain")
        .unwrap();
    let upload: serde_json::Value = client
        .post(format!("{}/api/upload", base))
        .multipart(reqwest::multipart::Form::new().part("document", part))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(upload["result"]
        .as_str()
        .unwrap()
        .contains("✅ Successfully processed and stored!"));

    let part = reqwest::multipart::Part::bytes(b"hello upload".to_vec())
        .file_name("hello.txt")
        .mime_str("text/plain")
        .unwrap();
    let chat: serde_json::Value = client
        .post(format!("{}/chat/upload", base))
        .multipart(
            reqwest::multipart::Form::new()
                .part("document", part)
                .text("question", "What does it say?")
                .text("session_id", "uploader"),
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chat["response"], "This is the answer.");
    assert!(dir_is_empty(&f.tmp.path().join("media")));
}
