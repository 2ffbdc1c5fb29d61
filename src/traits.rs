//! Collaborator traits.
//!
//! The ingestion and retrieval core talks to the outside world only through
//! the traits in this module. Production implementations live next to their
//! service (`connector_drive`, `history`, `llm`, `embedding`, `store::qdrant`,
//! `notify`); tests substitute in-memory fakes.
//!
//! ```text
//!  DriveSource ──▶ Ingestor ──▶ VectorIndex ──▶ VectorBackend
//!                    │   ▲            ▲
//!                    ▼   │            │
//!          LanguageModel  Embedder  RetrievalTool ──▶ ChatAgent ──▶ DocumentStore
//!                    │
//!                    ▼
//!                 Notifier ◀── DeletionWorkflow
//! ```
//!
//! Every method returns `Result<_, ServiceError>` so callers pick their own
//! skip / fail policy.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::ServiceError;
use crate::models::{DriveFile, SearchHit, VectorPoint};

// ═══════════════════════════════════════════════════════════════════════
// Drive
// ═══════════════════════════════════════════════════════════════════════

/// A cloud drive folder that documents are ingested from.
#[async_trait]
pub trait DriveSource: Send + Sync {
    /// All non-trashed files directly under `folder_id`, in listing order.
    /// Pagination is handled inside the implementation.
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>, ServiceError>;

    /// The file's text, or `None` when the file has no retrievable content.
    async fn download(&self, file: &DriveFile) -> Result<Option<String>, ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Document store (chat history)
// ═══════════════════════════════════════════════════════════════════════

/// A remote text document that transcripts are appended to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn append_text(&self, doc_id: &str, text: &str) -> Result<(), ServiceError>;

    async fn read_all(&self, doc_id: &str) -> Result<Option<String>, ServiceError>;

    async fn clear(&self, doc_id: &str) -> Result<(), ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Language model
// ═══════════════════════════════════════════════════════════════════════

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// A single, non-streaming generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    /// Overrides the client's configured temperature.
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            turns: vec![Turn::user(user)],
            temperature: None,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Embeddings
// ═══════════════════════════════════════════════════════════════════════

/// Text-to-vector provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-large"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `3072`).
    fn dims(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Vector backend
// ═══════════════════════════════════════════════════════════════════════

/// Nearest-neighbour store bound to a single collection.
///
/// Payload keys passed in and returned are the flat chunk payload
/// (`file_id`, `pubkey`, the six metadata fields); any nesting the backend
/// uses on the wire is its own business.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn collection_name(&self) -> &str;

    async fn collection_exists(&self) -> Result<bool, ServiceError>;

    /// Create the collection with cosine distance.
    async fn create_collection(&self, dims: usize) -> Result<(), ServiceError>;

    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<(), ServiceError>;

    /// Top `limit` points by similarity, highest first.
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>, ServiceError>;

    /// Remove every point whose payload `file_id` equals `file_id`.
    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), ServiceError>;

    /// Points for `file_id`, optionally restricted to one `content_hash`.
    async fn count(&self, file_id: &str, content_hash: Option<&str>)
        -> Result<usize, ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════════════════

/// Operator notification and approval channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), ServiceError>;

    /// Ask a human to approve `text`. Returns `Ok(false)` on explicit decline
    /// and on timeout.
    async fn request_approval(&self, text: &str, timeout: Duration) -> Result<bool, ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Agent tools
// ═══════════════════════════════════════════════════════════════════════

/// A capability the chat agent can invoke by name.
///
/// Modelled on OpenAI function calling: a name, a one-line description for
/// the model and a JSON Schema for the parameters.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"document_search"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call the tool.
    fn description(&self) -> &str;

    /// JSON Schema object describing the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned text is fed back to the model verbatim.
    async fn execute(&self, params: Value) -> anyhow::Result<String>;
}
