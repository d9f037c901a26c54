//! Language-model fallback: prompt assembly, invocation, and tone shaping.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{ChatMessage, LanguageModel, LlmRequest, Role};
use crate::memory::ConversationMemory;

pub const PERSONA: &str =
    "You are Thara Chat, a helpful AI assistant. Provide concise, friendly responses.";

pub const GENERATION_FAILED: &str =
    "I encountered an error while processing your request. Please try again.";

const NATURAL_OPENERS: [&str; 5] = ["I", "You", "We", "The", "This"];
const TERMINAL_PUNCTUATION: [char; 3] = ['.', '!', '?'];
const POSITIVE_WORDS: [&str; 5] = ["great", "excellent", "wonderful", "success", "happy"];

pub struct ResponseGenerator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Asks the model and returns its raw text.
    pub async fn generate(&self, question: &str, memory: &ConversationMemory) -> Result<String> {
        let request = build_request(question, "", memory);
        let reply = tokio::time::timeout(self.timeout, self.model.invoke(&request))
            .await
            .with_context(|| {
                format!(
                    "{} timed out after {}s",
                    self.model.model_name(),
                    self.timeout.as_secs()
                )
            })??;

        let text = reply.into_text();
        if text.trim().is_empty() {
            bail!("{} returned an empty reply", self.model.model_name());
        }
        Ok(text)
    }

    /// Generates and formats an answer; any failure becomes a generic
    /// retry message.
    pub async fn answer(&self, question: &str, memory: &ConversationMemory) -> String {
        match self.generate(question, memory).await {
            Ok(text) => format_response(&text),
            Err(e) => {
                tracing::error!(error = %e, model = self.model.model_name(), "error generating response");
                GENERATION_FAILED.to_string()
            }
        }
    }
}

pub fn build_request(question: &str, context: &str, memory: &ConversationMemory) -> LlmRequest {
    let prompt = format!(
        "Please provide a helpful, friendly response to the following question.\n\
         Be conversational but informative, and use markdown formatting when helpful.\n\n\
         Context:\n{}\n\n\
         Question: {}\n\n\
         Response:",
        context, question
    );

    let mut history = Vec::with_capacity(memory.len() * 2);
    for exchange in memory.exchanges() {
        history.push(ChatMessage::new(Role::User, exchange.input.clone()));
        history.push(ChatMessage::new(Role::Assistant, exchange.output.clone()));
    }

    LlmRequest {
        system: PERSONA.to_string(),
        history,
        prompt,
    }
}

/// Conversational post-processing, applied in order: opener, punctuation,
/// positive-sentiment emoji.
pub fn format_response(text: &str) -> String {
    let mut out = if NATURAL_OPENERS.iter().any(|o| text.starts_with(o)) {
        text.to_string()
    } else {
        let mut chars = text.chars();
        let rest = match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        format!("I found that {}", rest)
    };

    if !out.ends_with(TERMINAL_PUNCTUATION) {
        out.push('.');
    }

    let lower = out.to_lowercase();
    if POSITIVE_WORDS.iter().any(|w| lower.contains(w)) {
        out.push_str(" 😊");
    }

    out
}
