//! Language model abstraction and the Ollama chat backend.
//!
//! The router only needs one call: hand the model a persona, the session's
//! prior exchanges, and the prompt text, and get text back. Backends may reply
//! with a bare string or with a structured `{ "text": ... }` object; both are
//! represented by [`LlmReply`].
//!
//! # Retry Strategy
//!
//! The Ollama backend retries transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, ... (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::LlmConfig;

/// Role of a message in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A fully assembled prompt: persona, prior exchanges, current prompt text.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
}

impl LlmRequest {
    /// Flattens the request into the message list chat backends expect.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::new(Role::System, self.system.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::new(Role::User, self.prompt.clone()));
        messages
    }
}

/// Reply payload: either plain text or an object carrying a `text` field.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LlmReply {
    Text(String),
    Structured { text: String },
}

impl LlmReply {
    pub fn into_text(self) -> String {
        match self {
            LlmReply::Text(text) | LlmReply::Structured { text } => text,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    async fn invoke(&self, request: &LlmRequest) -> Result<LlmReply>;
}

/// Backend used when `llm.provider = "disabled"`; every call fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn invoke(&self, _request: &LlmRequest) -> Result<LlmReply> {
        bail!("Language model is disabled")
    }
}

/// Chat backend calling a local Ollama instance's `/api/chat` endpoint.
pub struct OllamaModel {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, request: &LlmRequest) -> Result<LlmReply> {
        let messages: Vec<serde_json::Value> = request
            .messages()
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/chat", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_ollama_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama chat failed after retries")))
    }
}

/// Pulls the reply out of an `/api/chat` response. Accepts the chat shape
/// (`message.content`), the generate shape (`response`), and a bare `text`.
fn parse_ollama_chat_response(json: &serde_json::Value) -> Result<LlmReply> {
    if let Some(content) = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Ok(LlmReply::Text(content.to_string()));
    }
    if let Some(response) = json.get("response").and_then(|r| r.as_str()) {
        return Ok(LlmReply::Text(response.to_string()));
    }
    serde_json::from_value::<LlmReply>(json.clone())
        .map_err(|_| anyhow::anyhow!("Invalid Ollama response: no message content"))
}

/// Create the configured [`LanguageModel`].
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "ollama" => Ok(Box::new(OllamaModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
