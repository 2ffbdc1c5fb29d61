//! Vector index adapter.
//!
//! [`VectorIndex`] pairs an [`Embedder`] with a [`VectorBackend`] and exposes
//! the text-level operations the pipeline needs:
//!
//! | Method | Failure policy |
//! |--------|----------------|
//! | [`ensure_collection`](VectorIndex::ensure_collection) | typed error, fatal at startup |
//! | [`upsert`](VectorIndex::upsert) | typed error, caller isolates per file |
//! | [`search`](VectorIndex::search) | logged, empty result |
//! | [`delete_by_file_id`](VectorIndex::delete_by_file_id) | logged, `false` |
//! | [`count_for_file`](VectorIndex::count_for_file) | typed error |
//!
//! Backends: [`qdrant::QdrantBackend`] (REST) and [`memory::InMemoryBackend`].
//! Nothing is cached in process; every call goes to the backend.

pub mod memory;
pub mod qdrant;

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::IndexError;
use crate::models::{SearchHit, VectorPoint};
use crate::traits::{Embedder, VectorBackend};

pub struct VectorIndex {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    pub fn new(backend: Arc<dyn VectorBackend>, embedder: Arc<dyn Embedder>) -> Self {
        Self { backend, embedder }
    }

    pub fn collection_name(&self) -> &str {
        self.backend.collection_name()
    }

    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    /// Create the collection unless it already exists. Returns whether it
    /// was created by this call.
    pub async fn ensure_collection(&self, dims: usize) -> Result<bool, IndexError> {
        if self.backend.collection_exists().await? {
            tracing::debug!(collection = self.collection_name(), "collection exists");
            return Ok(false);
        }
        self.backend.create_collection(dims).await?;
        tracing::info!(collection = self.collection_name(), dims, "created collection");
        Ok(true)
    }

    /// Embed `texts` and write one record per `(text, payload)` pair.
    /// Returns the new point ids.
    pub async fn upsert(
        &self,
        texts: &[String],
        payloads: Vec<Map<String, Value>>,
    ) -> Result<Vec<String>, IndexError> {
        if texts.len() != payloads.len() {
            return Err(IndexError::LengthMismatch {
                texts: texts.len(),
                payloads: payloads.len(),
            });
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(IndexError::EmbeddingCount {
                expected: texts.len(),
                got: vectors.len(),
            });
        }

        let points: Vec<VectorPoint> = texts
            .iter()
            .zip(vectors)
            .zip(payloads)
            .map(|((text, vector), payload)| VectorPoint {
                id: uuid::Uuid::new_v4().to_string(),
                vector,
                text: text.clone(),
                payload,
            })
            .collect();
        let ids = points.iter().map(|p| p.id.clone()).collect();

        self.backend.upsert_points(points).await?;
        Ok(ids)
    }

    /// Top `k` chunks for `query`, highest similarity first.
    pub async fn try_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(IndexError::EmbeddingCount {
                expected: 1,
                got: vectors.len(),
            });
        }
        Ok(self.backend.query(&vectors[0], k).await?)
    }

    /// Like [`try_search`](Self::try_search), logging failures and returning
    /// no hits.
    pub async fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        match self.try_search(query, k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(error = %e, "similarity search failed");
                Vec::new()
            }
        }
    }

    pub async fn try_delete_by_file_id(&self, file_id: &str) -> Result<(), IndexError> {
        self.backend.delete_by_file_id(file_id).await?;
        Ok(())
    }

    /// Delete every record of `file_id`. Failures are logged and give `false`.
    pub async fn delete_by_file_id(&self, file_id: &str) -> bool {
        match self.try_delete_by_file_id(file_id).await {
            Ok(()) => {
                tracing::info!(file_id, "deleted records");
                true
            }
            Err(e) => {
                tracing::error!(file_id, error = %e, "delete failed");
                false
            }
        }
    }

    pub async fn count_for_file(
        &self,
        file_id: &str,
        content_hash: Option<&str>,
    ) -> Result<usize, IndexError> {
        Ok(self.backend.count(file_id, content_hash).await?)
    }
}
