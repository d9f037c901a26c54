//! Core data models used throughout Thara Chat.
//!
//! These types represent the conversation turns, ingested documents, and
//! vector entries that flow between the router, the history store, and the
//! ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One user query and the response it received.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: i64,
    pub user_query: String,
    pub bot_response: String,
    pub timestamp: DateTime<Utc>,
}

/// Document row persisted after successful ingestion.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub filename: String,
    pub content: String,
    pub embedding_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Metadata attached to a vector entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorMetadata {
    /// Path the document was ingested from.
    pub source: String,
    /// Display name (file name).
    pub name: String,
    /// File extension without the leading dot.
    #[serde(rename = "type")]
    pub kind: String,
    /// RFC 3339 ingestion time.
    pub timestamp: String,
}

/// An embedding plus its source text, keyed by the document's embedding id.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub embedding: Vec<f32>,
    pub text: String,
    pub metadata: VectorMetadata,
}

/// Converts a millisecond Unix timestamp from SQLite into a UTC instant.
pub fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
