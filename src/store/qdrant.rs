//! Qdrant REST backend.
//!
//! Points are stored in the common `{ "page_content": text, "metadata": {...} }`
//! payload layout, so filters address metadata keys as `metadata.<key>`.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | exists | `GET /collections` |
//! | create | `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | query  | `POST /collections/{name}/points/search` |
//! | delete | `POST /collections/{name}/points/delete?wait=true` |
//! | count  | `POST /collections/{name}/points/count` |

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::IndexConfig;
use crate::error::ServiceError;
use crate::http;
use crate::models::{SearchHit, VectorPoint};
use crate::traits::VectorBackend;

const SERVICE: &str = "qdrant";
const MAX_RETRIES: u32 = 3;

pub struct QdrantBackend {
    base_url: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl QdrantBackend {
    /// The API key is optional; a local Qdrant usually runs without one.
    pub fn new(config: &IndexConfig) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key,
            client: http::client(config.timeout_secs)?,
        })
    }

    fn points_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}/points{}",
            self.base_url, self.collection, suffix
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn call(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Value, ServiceError> {
        http::send_json_with_retry(SERVICE, MAX_RETRIES, || {
            let builder = self.request(method.clone(), url);
            match body {
                Some(b) => builder.json(b),
                None => builder,
            }
        })
        .await
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool, ServiceError> {
        let url = format!("{}/collections", self.base_url);
        let json = self.call(reqwest::Method::GET, &url, None).await?;
        Ok(parse_collection_names(&json)?
            .iter()
            .any(|n| n == &self.collection))
    }

    async fn create_collection(&self, dims: usize) -> Result<(), ServiceError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let body = json!({ "vectors": { "size": dims, "distance": "Cosine" } });
        self.call(reqwest::Method::PUT, &url, Some(&body)).await?;
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<VectorPoint>) -> Result<(), ServiceError> {
        let body = upsert_body(&points);
        self.call(reqwest::Method::PUT, &self.points_url("?wait=true"), Some(&body))
            .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>, ServiceError> {
        let body = json!({ "vector": vector, "limit": limit, "with_payload": true });
        let json = self
            .call(reqwest::Method::POST, &self.points_url("/search"), Some(&body))
            .await?;
        parse_search_response(&json)
    }

    async fn delete_by_file_id(&self, file_id: &str) -> Result<(), ServiceError> {
        let body = json!({ "filter": file_filter(file_id, None) });
        self.call(
            reqwest::Method::POST,
            &self.points_url("/delete?wait=true"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn count(
        &self,
        file_id: &str,
        content_hash: Option<&str>,
    ) -> Result<usize, ServiceError> {
        let body = json!({ "filter": file_filter(file_id, content_hash), "exact": true });
        let json = self
            .call(reqwest::Method::POST, &self.points_url("/count"), Some(&body))
            .await?;
        json.pointer("/result/count")
            .and_then(|c| c.as_u64())
            .map(|c| c as usize)
            .ok_or_else(|| ServiceError::malformed(SERVICE, "missing result.count"))
    }
}

// ============ Wire format ============

pub fn upsert_body(points: &[VectorPoint]) -> Value {
    let points: Vec<Value> = points
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "vector": p.vector,
                "payload": { "page_content": p.text, "metadata": p.payload },
            })
        })
        .collect();
    json!({ "points": points })
}

/// Exact-match filter on `metadata.file_id` (and `metadata.content_hash`).
pub fn file_filter(file_id: &str, content_hash: Option<&str>) -> Value {
    let mut must = vec![json!({ "key": "metadata.file_id", "match": { "value": file_id } })];
    if let Some(hash) = content_hash {
        must.push(json!({ "key": "metadata.content_hash", "match": { "value": hash } }));
    }
    json!({ "must": must })
}

pub fn parse_collection_names(json: &Value) -> Result<Vec<String>, ServiceError> {
    let collections = json
        .pointer("/result/collections")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing result.collections"))?;
    Ok(collections
        .iter()
        .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
        .map(String::from)
        .collect())
}

pub fn parse_search_response(json: &Value) -> Result<Vec<SearchHit>, ServiceError> {
    let results = json
        .get("result")
        .and_then(|r| r.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing result array"))?;

    let mut hits = Vec::with_capacity(results.len());
    for item in results {
        // Qdrant ids are either UUID strings or unsigned integers.
        let id = match item.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(ServiceError::malformed(SERVICE, "point without id")),
        };
        let score = item.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
        let payload = item.get("payload");
        let text = payload
            .and_then(|p| p.get("page_content"))
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let metadata = payload
            .and_then(|p| p.get("metadata"))
            .and_then(|m| m.as_object())
            .cloned()
            .unwrap_or_else(Map::new);
        hits.push(SearchHit {
            id,
            text,
            score,
            payload: metadata,
        });
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_body_nests_metadata() {
        let mut payload = Map::new();
        payload.insert("file_id".into(), json!("f1"));
        let body = upsert_body(&[VectorPoint {
            id: "p1".into(),
            vector: vec![0.5, 0.5],
            text: "hello".into(),
            payload,
        }]);
        let point = &body["points"][0];
        assert_eq!(point["id"], "p1");
        assert_eq!(point["payload"]["page_content"], "hello");
        assert_eq!(point["payload"]["metadata"]["file_id"], "f1");
    }

    #[test]
    fn filter_targets_metadata_file_id() {
        let filter = file_filter("abc", None);
        assert_eq!(filter["must"][0]["key"], "metadata.file_id");
        assert_eq!(filter["must"][0]["match"]["value"], "abc");
        assert_eq!(filter["must"].as_array().unwrap().len(), 1);

        let filter = file_filter("abc", Some("h"));
        assert_eq!(filter["must"][1]["key"], "metadata.content_hash");
    }

    #[test]
    fn parses_collection_list() {
        let json = json!({ "result": { "collections": [{ "name": "a" }, { "name": "b" }] } });
        assert_eq!(parse_collection_names(&json).unwrap(), vec!["a", "b"]);
        assert!(parse_collection_names(&json!({})).is_err());
    }

    #[test]
    fn parses_search_hits() {
        let json = json!({
            "result": [
                { "id": "u-1", "score": 0.9, "payload": { "page_content": "one", "metadata": { "file_id": "f" } } },
                { "id": 7, "score": 0.5, "payload": { "page_content": "two" } }
            ]
        });
        let hits = parse_search_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "one");
        assert_eq!(hits[0].file_id(), Some("f"));
        assert_eq!(hits[1].id, "7");
        assert!(hits[1].payload.is_empty());
    }
}
