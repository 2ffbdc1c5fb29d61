//! TOML configuration.
//!
//! Every section has serde defaults so a minimal file only needs the values
//! that cannot be guessed (the Drive folder, the history document, the
//! Telegram chat). Secrets never live in the file: each section names the
//! environment variable holding its key.
//!
//! ```toml
//! [index]
//! url = "http://localhost:6333"
//! collection = "nostr-damus-user-profiles"
//!
//! [ingestion]
//! folder_id = "1AbCdEf..."
//! batch_size = 5
//!
//! [history]
//! document_id = "1XyZ..."
//!
//! [telegram]
//! chat_id = "123456789"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

// ============ Vector index ============

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"qdrant"` or `"memory"`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default = "default_index_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: default_index_url(),
            api_key_env: default_index_api_key_env(),
            collection: default_collection(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_backend() -> String {
    "qdrant".to_string()
}
fn default_index_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_index_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}
fn default_collection() -> String {
    "nostr-damus-user-profiles".to_string()
}

// ============ Embeddings ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}
fn default_dims() -> usize {
    3072
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

// ============ Language model ============

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_google_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    /// Minimum spacing between two model calls.
    #[serde(default)]
    pub min_interval_ms: u64,
    /// Maximum model calls in flight.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_output_tokens: default_max_output_tokens(),
            temperature: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            api_key_env: default_google_key_env(),
            base_url: default_gemini_base_url(),
            min_interval_ms: 0,
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_llm_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_google_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_max_concurrent() -> usize {
    1
}

// ============ Metadata extraction ============

#[derive(Debug, Deserialize, Clone)]
pub struct MetadataConfig {
    /// Characters of document text sent to the model.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_metadata_temperature")]
    pub temperature: f32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_input_chars: default_max_input_chars(),
            temperature: default_metadata_temperature(),
        }
    }
}

fn default_max_input_chars() -> usize {
    50_000
}
fn default_metadata_temperature() -> f32 {
    0.4
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    3000
}
fn default_chunk_overlap() -> usize {
    200
}

// ============ Ingestion ============

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    /// Files processed concurrently within one batch.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Courtesy pause after each file.
    #[serde(default = "default_file_delay_ms")]
    pub file_delay_ms: u64,
    /// Skip files whose content hash is already indexed.
    #[serde(default)]
    pub skip_unchanged: bool,
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_completion_message")]
    pub completion_message: String,
    /// Send a progress message through the notifier after every batch.
    #[serde(default)]
    pub notify_progress: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            batch_size: default_ingest_batch_size(),
            parallelism: default_parallelism(),
            file_delay_ms: default_file_delay_ms(),
            skip_unchanged: false,
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            completion_message: default_completion_message(),
            notify_progress: false,
        }
    }
}

fn default_ingest_batch_size() -> usize {
    5
}
fn default_parallelism() -> usize {
    1
}
fn default_file_delay_ms() -> u64 {
    1000
}
fn default_completion_message() -> String {
    "Qdrant vector store upsert completed".to_string()
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_tool_name")]
    pub tool_name: String,
    #[serde(default = "default_tool_description")]
    pub tool_description: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            tool_name: default_tool_name(),
            tool_description: default_tool_description(),
        }
    }
}

fn default_top_k() -> usize {
    20
}
fn default_max_context_chars() -> usize {
    80_000
}
fn default_tool_name() -> String {
    "nostr_damus_user_profiles".to_string()
}
fn default_tool_description() -> String {
    "Retrieve information about Nostr or Damus users".to_string()
}

// ============ Agent ============

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Exchanges (user + assistant pairs) kept in conversation memory.
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            memory_window: default_memory_window(),
            max_steps: default_max_steps(),
            system_prompt: None,
        }
    }
}

fn default_memory_window() -> usize {
    40
}
fn default_max_steps() -> usize {
    5
}

// ============ Google (Drive + Docs) ============

#[derive(Debug, Deserialize, Clone)]
pub struct GoogleConfig {
    /// Authorized-user token file (`client_id`, `client_secret`, `refresh_token`).
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    /// A ready bearer token in this variable takes precedence over the token file.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            access_token_env: default_access_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}
fn default_access_token_env() -> String {
    "GOOGLE_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HistoryConfig {
    /// Google Docs document receiving chat transcripts. Unset disables history.
    #[serde(default)]
    pub document_id: Option<String>,
}

// ============ Telegram ============

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub chat_id: String,
    #[serde(default = "default_telegram_token_env")]
    pub bot_token_env: String,
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}
fn default_approval_timeout_secs() -> u64 {
    15 * 60
}
fn default_poll_timeout_secs() -> u64 {
    20
}

impl Config {
    /// Approval wait for destructive operations.
    pub fn approval_timeout_secs(&self) -> u64 {
        self.telegram
            .as_ref()
            .map(|t| t.approval_timeout_secs)
            .unwrap_or_else(default_approval_timeout_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate ingestion
    if config.ingestion.batch_size == 0 {
        bail!("ingestion.batch_size must be >= 1");
    }
    if config.ingestion.parallelism == 0 {
        bail!("ingestion.parallelism must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "openai" => {}
        other => bail!("Unknown embedding provider: '{}'. Must be openai.", other),
    }

    match config.llm.provider.as_str() {
        "gemini" => {}
        other => bail!("Unknown llm provider: '{}'. Must be gemini.", other),
    }
    if config.llm.max_concurrent == 0 {
        bail!("llm.max_concurrent must be >= 1");
    }

    match config.index.backend.as_str() {
        "qdrant" | "memory" => {}
        other => bail!(
            "Unknown index backend: '{}'. Must be qdrant or memory.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 3000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.ingestion.batch_size, 5);
        assert_eq!(config.ingestion.parallelism, 1);
        assert_eq!(config.ingestion.file_delay_ms, 1000);
        assert_eq!(config.retrieval.top_k, 20);
        assert_eq!(config.embedding.dims, 3072);
        assert_eq!(config.metadata.max_input_chars, 50_000);
        assert_eq!(config.agent.memory_window, 40);
        assert_eq!(config.approval_timeout_secs(), 900);
        assert!(config.telegram.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let file = write_config(
            r#"
[index]
collection = "profiles"

[ingestion]
folder_id = "folder-1"
batch_size = 2
skip_unchanged = true

[telegram]
chat_id = "42"
approval_timeout_secs = 30
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.index.collection, "profiles");
        assert_eq!(config.ingestion.folder_id.as_deref(), Some("folder-1"));
        assert_eq!(config.ingestion.batch_size, 2);
        assert!(config.ingestion.skip_unchanged);
        assert_eq!(config.approval_timeout_secs(), 30);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let file = write_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let file = write_config("[ingestion]\nbatch_size = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let file = write_config("[index]\nbackend = \"pinecone\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("pinecone"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
