//! In-memory [`VectorBackend`] for tests and offline runs.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search is brute-force cosine
//! similarity over all stored vectors. Call counters let tests assert how
//! often the collection was created or deleted from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::ServiceError;
use crate::models::{SearchHit, VectorPoint};
use crate::traits::VectorBackend;

pub struct InMemoryBackend {
    name: String,
    dims: RwLock<Option<usize>>,
    points: RwLock<Vec<VectorPoint>>,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dims: RwLock::new(None),
            points: RwLock::new(Vec::new()),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every stored point, in insertion order.
    pub fn points(&self) -> Vec<VectorPoint> {
        self.points.read().unwrap().clone()
    }
}

fn payload_str<'a>(point: &'a VectorPoint, key: &str) -> Option<&'a str> {
    point.payload.get(key).and_then(|v| v.as_str())
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn collection_exists(&self) -> Result<bool, ServiceError> {
        Ok(self.dims.read().unwrap().is_some())
    }

    async fn create_collection(&self, dims: usize) -> Result<(), ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.dims.write().unwrap() = Some(dims);
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<(), ServiceError> {
        let mut stored = self.points.write().unwrap();
        for point in points {
            stored.retain(|p| p.id != point.id);
            stored.push(point);
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>, ServiceError> {
        let stored = self.points.read().unwrap();
        let mut hits: Vec<SearchHit> = stored
            .iter()
            .map(|p| SearchHit {
                id: p.id.clone(),
                text: p.text.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), ServiceError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.points
            .write()
            .unwrap()
            .retain(|p| payload_str(p, "file_id") != Some(file_id));
        Ok(())
    }

    async fn count(
        &self,
        file_id: &str,
        content_hash: Option<&str>,
    ) -> Result<usize, ServiceError> {
        let stored = self.points.read().unwrap();
        Ok(stored
            .iter()
            .filter(|p| payload_str(p, "file_id") == Some(file_id))
            .filter(|p| content_hash.map_or(true, |h| payload_str(p, "content_hash") == Some(h)))
            .count())
    }
}
