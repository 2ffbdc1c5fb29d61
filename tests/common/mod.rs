//! In-memory fakes for every external collaborator.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drive_rag::error::ServiceError;
use drive_rag::models::{DriveFile, SearchHit, VectorPoint};
use drive_rag::store::memory::InMemoryBackend;
use drive_rag::store::VectorIndex;
use drive_rag::traits::{
    DocumentStore, DriveSource, Embedder, GenerateRequest, LanguageModel, Notifier, VectorBackend,
};

// ─── Drive ──────────────────────────────────────────────────────────

pub struct FakeDrive {
    files: Mutex<Vec<(DriveFile, Option<String>)>>,
    failing: HashSet<String>,
    list_fails: bool,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeDrive {
    pub fn new(files: Vec<(DriveFile, Option<String>)>) -> Self {
        Self {
            files: Mutex::new(files),
            failing: HashSet::new(),
            list_fails: false,
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// `n` text files `f1..fn` named `npub1..npubn`.
    pub fn numbered(n: usize) -> Self {
        Self::new(
            (1..=n)
                .map(|i| {
                    (
                        DriveFile::new(format!("f{}", i), format!("npub{}", i), "text/plain"),
                        Some(format!("Profile {} talks about relays and zaps.", i)),
                    )
                })
                .collect(),
        )
    }

    pub fn failing_download(mut self, file_id: &str) -> Self {
        self.failing.insert(file_id.to_string());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.list_fails = true;
        self
    }

    pub fn set_content(&self, file_id: &str, content: Option<&str>) {
        for (file, body) in self.files.lock().unwrap().iter_mut() {
            if file.id == file_id {
                *body = content.map(String::from);
            }
        }
    }
}

#[async_trait]
impl DriveSource for FakeDrive {
    async fn list_files(&self, _folder_id: &str) -> Result<Vec<DriveFile>, ServiceError> {
        if self.list_fails {
            return Err(ServiceError::unavailable("drive", "listing down"));
        }
        Ok(self.files.lock().unwrap().iter().map(|(f, _)| f.clone()).collect())
    }

    async fn download(&self, file: &DriveFile) -> Result<Option<String>, ServiceError> {
        self.downloads.lock().unwrap().push(file.id.clone());
        if self.failing.contains(&file.id) {
            return Err(ServiceError::unavailable("drive", "download failed"));
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|(f, _)| f.id == file.id)
            .and_then(|(_, body)| body.clone()))
    }
}

// ─── Language model ─────────────────────────────────────────────────

pub const METADATA_REPLY: &str = r#"```json
{
    "overarching_theme": "Decentralized social media",
    "recurring_topics": ["relays", "zaps"],
    "pain_points": ["spam"],
    "analytical_insights": ["curious tone"],
    "conclusion": "Protocol enthusiast",
    "keywords": ["nostr", "damus"]
}
```"#;

/// Replays queued replies, then repeats the fallback reply.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
    pub requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn constant(reply: &str) -> Arc<Self> {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(replies: Vec<Result<&str, &str>>, fallback: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
            fallback: fallback.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, ServiceError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(ServiceError::unavailable("scripted", message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

// ─── Embeddings ─────────────────────────────────────────────────────

/// Bag-of-words hashed into 16 buckets.
pub struct WordEmbedder;

pub const WORD_DIMS: usize = 16;

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "words"
    }

    fn dims(&self) -> usize {
        WORD_DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; WORD_DIMS];
                for word in t.split_whitespace() {
                    let word = word.to_lowercase();
                    let bucket = word.bytes().map(|b| b as usize).sum::<usize>() % WORD_DIMS;
                    v[bucket] += 1.0;
                }
                v
            })
            .collect())
    }
}

pub fn memory_index() -> (Arc<InMemoryBackend>, Arc<VectorIndex>) {
    let backend = Arc::new(InMemoryBackend::new("test-collection"));
    let index = Arc::new(VectorIndex::new(backend.clone(), Arc::new(WordEmbedder)));
    (backend, index)
}

// ─── Vector backend with injected delete failures ───────────────────

pub struct FlakyBackend {
    pub inner: InMemoryBackend,
    pub failing_deletes: HashSet<String>,
}

#[async_trait]
impl VectorBackend for FlakyBackend {
    fn collection_name(&self) -> &str {
        self.inner.collection_name()
    }

    async fn collection_exists(&self) -> Result<bool, ServiceError> {
        self.inner.collection_exists().await
    }

    async fn create_collection(&self, dims: usize) -> Result<(), ServiceError> {
        self.inner.create_collection(dims).await
    }

    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<(), ServiceError> {
        self.inner.upsert_points(points).await
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>, ServiceError> {
        self.inner.query(vector, limit).await
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), ServiceError> {
        if self.failing_deletes.contains(file_id) {
            return Err(ServiceError::unavailable("flaky", "delete refused"));
        }
        self.inner.delete_by_file_id(file_id).await
    }

    async fn count(&self, file_id: &str, content_hash: Option<&str>) -> Result<usize, ServiceError> {
        self.inner.count(file_id, content_hash).await
    }
}

// ─── Notifier ───────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum Approval {
    Approve,
    Decline,
    /// Wait out the timeout.
    Silent,
    /// The approval channel itself fails.
    Broken,
}

pub struct RecordingNotifier {
    approval: Approval,
    pub messages: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new(approval: Approval) -> Arc<Self> {
        Arc::new(Self {
            approval,
            messages: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), ServiceError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn request_approval(&self, text: &str, timeout: Duration) -> Result<bool, ServiceError> {
        self.prompts.lock().unwrap().push(text.to_string());
        match self.approval {
            Approval::Approve => Ok(true),
            Approval::Decline => Ok(false),
            Approval::Silent => {
                let _ = tokio::time::timeout(timeout, std::future::pending::<()>()).await;
                Ok(false)
            }
            Approval::Broken => Err(ServiceError::unavailable("notifier", "bot unreachable")),
        }
    }
}

// ─── Document store ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryDocs {
    pub docs: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl DocumentStore for MemoryDocs {
    async fn append_text(&self, doc_id: &str, text: &str) -> Result<(), ServiceError> {
        self.docs
            .lock()
            .unwrap()
            .entry(doc_id.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn read_all(&self, doc_id: &str) -> Result<Option<String>, ServiceError> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(doc_id)
            .filter(|d| !d.is_empty())
            .cloned())
    }

    async fn clear(&self, doc_id: &str) -> Result<(), ServiceError> {
        self.docs.lock().unwrap().remove(doc_id);
        Ok(())
    }
}
