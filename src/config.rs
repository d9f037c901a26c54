use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    /// Most recent (input, output) pairs kept per session for prompt context.
    #[serde(default = "default_memory_turns")]
    pub memory_turns: usize,
    /// Upper bound on sessions held in memory at once.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
    /// Sessions untouched for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            memory_turns: default_memory_turns(),
            max_sessions: default_max_sessions(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "deepseek-r1:latest".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_memory_turns() -> usize {
    20
}
fn default_max_sessions() -> u64 {
    1000
}
fn default_session_idle_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: default_ocr_enabled(),
            command: default_ocr_command(),
            language: None,
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

fn default_ocr_enabled() -> bool {
    true
}
fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Enables the "search the web for ..." routing rule.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_search_url")]
    pub url: String,
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_search_url(),
            max_results: default_search_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_url() -> String {
    "https://api.duckduckgo.com/".to_string()
}
fn default_search_max_results() -> usize {
    3
}
fn default_search_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    /// Upper bound on extracted text folded into an upload question.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            max_bytes: default_max_bytes(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("./media")
}
fn default_max_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_max_context_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    match config.llm.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    if config.llm.memory_turns == 0 {
        anyhow::bail!("llm.memory_turns must be > 0");
    }

    if config.llm.max_sessions == 0 {
        anyhow::bail!("llm.max_sessions must be > 0");
    }

    if config.llm.session_idle_secs == 0 {
        anyhow::bail!("llm.session_idle_secs must be > 0");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }

    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    if config.upload.max_bytes == 0 {
        anyhow::bail!("upload.max_bytes must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/thara.sqlite"

[server]
bind = "127.0.0.1:8000"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "deepseek-r1:latest");
        assert_eq!(config.search.max_results, 3);
        assert!(!config.search.enabled);
        assert_eq!(config.upload.max_bytes, 5 * 1024 * 1024);
        assert!(config.ocr.enabled);
        assert_eq!(config.llm.max_sessions, 1000);
        assert_eq!(config.llm.session_idle_secs, 3600);
    }

    #[test]
    fn unknown_embedding_provider_is_rejected() {
        let content = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn openai_requires_model() {
        let content = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn zero_memory_turns_is_rejected() {
        let content = format!("{}\n[llm]\nmemory_turns = 0\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn session_limits_are_configurable() {
        let content = format!(
            "{}\n[llm]\nmax_sessions = 5\nsession_idle_secs = 60\n",
            MINIMAL
        );
        let config = parse_config(&content).unwrap();
        assert_eq!(config.llm.max_sessions, 5);
        assert_eq!(config.llm.session_idle_secs, 60);

        let content = format!("{}\n[llm]\nmax_sessions = 0\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }
}
