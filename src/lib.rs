//! # Thara Chat
//!
//! A conversational assistant that answers fixed intents and arithmetic
//! locally, remembers what it has been asked, ingests uploaded documents,
//! and falls back to a language model for everything else.
//!
//! ## Architecture
//!
//! ```text
//!  question ──▶ ┌──────────────┐   ┌─────────────┐
//!               │ ChatService  │──▶│ QueryRouter │──▶ intents / arithmetic /
//!  upload ────▶ │ (sessions)   │   │ (RuleChain) │    history / search / LLM
//!               └──────┬───────┘   └─────────────┘
//!                      │
//!                      ▼
//!               ┌──────────────┐   ┌──────────────┐
//!               │ IngestPipeline│──▶│ SQLite + vec │
//!               │ extract+embed │   │   index      │
//!               └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`models`] | Core data types |
//! | [`history`] | Persistent conversation log |
//! | [`memory`] | Per-session conversation memory |
//! | [`intent`] | Fixed-phrase intents and canned replies |
//! | [`arithmetic`] | Exact arithmetic evaluation |
//! | [`llm`] | Language model abstraction (Ollama) |
//! | [`responder`] | Prompt assembly and reply shaping |
//! | [`websearch`] | Web search provider and formatting |
//! | [`router`] | Ordered rule chain |
//! | [`extract`] / [`ocr`] | Text extraction from uploads |
//! | [`embedding`] / [`vector_index`] | Embeddings and their storage |
//! | [`ingest`] | Two-phase document ingestion |
//! | [`chat`] | The chat service |
//! | [`server`] | HTTP API |

pub mod arithmetic;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod history;
pub mod ingest;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod responder;
pub mod router;
pub mod server;
pub mod vector_index;
pub mod websearch;
