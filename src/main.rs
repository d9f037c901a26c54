//! # Thara Chat CLI (`thara`)
//!
//! ## Usage
//!
//! ```bash
//! thara --config ./config/thara.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `thara init` | Create the SQLite database and run schema migrations |
//! | `thara chat "<question>"` | Ask one question and print the answer |
//! | `thara ingest <path>` | Extract, store, and embed a document |
//! | `thara history` | Show recent conversation turns |
//! | `thara search "<query>"` | Run a web search |
//! | `thara serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use thara_chat::chat::{ChatService, DEFAULT_SESSION};
use thara_chat::{config, migrate, server};

/// Thara Chat, a conversational assistant with document ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/thara.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "thara",
    about = "Thara Chat: a conversational assistant with document ingestion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/thara.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ask a single question.
    Chat {
        question: String,

        /// Session whose memory the question belongs to.
        #[arg(long, default_value = DEFAULT_SESSION)]
        session: String,
    },

    /// Ingest a document (PDF, DOCX, TXT, or image).
    Ingest {
        path: PathBuf,

        /// Content type used when the extension is not recognized.
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Show recent conversation turns, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Search the web.
    Search { query: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::init(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Chat { question, session } => {
            let service = ChatService::from_config(&cfg).await?;
            println!("{}", service.chat(&session, &question).await);
        }
        Commands::Ingest { path, content_type } => {
            let service = ChatService::from_config(&cfg).await?;
            println!(
                "{}",
                service.ingest_path(&path, content_type.as_deref()).await
            );
        }
        Commands::History { limit } => {
            let service = ChatService::from_config(&cfg).await?;
            let turns = service.history(limit).await?;
            if turns.is_empty() {
                println!("No conversation history yet.");
            }
            for turn in turns {
                println!(
                    "[{}] {}\n  → {}\n",
                    turn.timestamp.format("%Y-%m-%d %H:%M"),
                    turn.user_query,
                    turn.bot_response
                );
            }
        }
        Commands::Search { query } => {
            let service = ChatService::from_config(&cfg).await?;
            println!("{}", service.search(&query).await);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
