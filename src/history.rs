//! Chat transcript store backed by a Google Docs document.
//!
//! Appends go to the end of the body (`endIndex - 1` of the last structural
//! element), reads concatenate every paragraph text run, and clearing
//! deletes the range `[1, endIndex - 1)`, leaving the document's mandatory
//! trailing newline in place. [`GoogleDocsStore::create_document`] starts a
//! fresh transcript document.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::TokenSource;
use crate::error::ServiceError;
use crate::http;
use crate::traits::DocumentStore;

const SERVICE: &str = "docs";
const DOCS_API: &str = "https://docs.googleapis.com/v1";
const MAX_RETRIES: u32 = 3;

pub struct GoogleDocsStore {
    tokens: Arc<TokenSource>,
    client: reqwest::Client,
    base_url: String,
}

impl GoogleDocsStore {
    pub fn new(tokens: Arc<TokenSource>, client: reqwest::Client) -> Self {
        Self {
            tokens,
            client,
            base_url: DOCS_API.to_string(),
        }
    }

    /// Create an empty document titled `title` and return its id.
    pub async fn create_document(&self, title: &str) -> Result<String, ServiceError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/documents", self.base_url);
        let body = json!({ "title": title });
        let json =
            http::send_json(SERVICE, self.client.post(&url).bearer_auth(&token).json(&body)).await?;
        let id = parse_created_document_id(&json)?;
        tracing::info!(document_id = %id, title, "created transcript document");
        Ok(id)
    }

    async fn get_document(&self, doc_id: &str) -> Result<Value, ServiceError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/documents/{}", self.base_url, doc_id);
        http::send_json_with_retry(SERVICE, MAX_RETRIES, || {
            self.client.get(&url).bearer_auth(&token)
        })
        .await
    }

    async fn batch_update(&self, doc_id: &str, requests: Value) -> Result<(), ServiceError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/documents/{}:batchUpdate", self.base_url, doc_id);
        let body = json!({ "requests": requests });
        http::send_json(SERVICE, self.client.post(&url).bearer_auth(&token).json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for GoogleDocsStore {
    async fn append_text(&self, doc_id: &str, text: &str) -> Result<(), ServiceError> {
        let doc = self.get_document(doc_id).await?;
        let end = body_end_index(&doc)?;
        self.batch_update(doc_id, insert_text_request(end, text)).await
    }

    async fn read_all(&self, doc_id: &str) -> Result<Option<String>, ServiceError> {
        let doc = self.get_document(doc_id).await?;
        let text = extract_text(&doc);
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    async fn clear(&self, doc_id: &str) -> Result<(), ServiceError> {
        let doc = self.get_document(doc_id).await?;
        let end = body_end_index(&doc)?;
        match delete_range_request(end) {
            Some(requests) => self.batch_update(doc_id, requests).await,
            None => Ok(()),
        }
    }
}

// ============ Document structure ============

/// `endIndex` of the last structural element in the document body.
pub fn body_end_index(doc: &Value) -> Result<i64, ServiceError> {
    doc.pointer("/body/content")
        .and_then(|c| c.as_array())
        .and_then(|c| c.last())
        .and_then(|e| e.get("endIndex"))
        .and_then(|i| i.as_i64())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "document body has no content"))
}

pub fn insert_text_request(end_index: i64, text: &str) -> Value {
    json!([{
        "insertText": {
            "location": { "index": (end_index - 1).max(1) },
            "text": text,
        }
    }])
}

/// `None` when the body holds nothing but the trailing newline.
pub fn delete_range_request(end_index: i64) -> Option<Value> {
    if end_index - 1 <= 1 {
        return None;
    }
    Some(json!([{
        "deleteContentRange": {
            "range": { "startIndex": 1, "endIndex": end_index - 1 }
        }
    }]))
}

pub fn parse_created_document_id(json: &Value) -> Result<String, ServiceError> {
    json.get("documentId")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(String::from)
        .ok_or_else(|| ServiceError::malformed(SERVICE, "created document has no documentId"))
}

/// Concatenate the text runs of every paragraph in the body.
pub fn extract_text(doc: &Value) -> String {
    let mut out = String::new();
    let content = match doc.pointer("/body/content").and_then(|c| c.as_array()) {
        Some(c) => c,
        None => return out,
    };
    for element in content {
        let runs = element
            .pointer("/paragraph/elements")
            .and_then(|e| e.as_array());
        for run in runs.into_iter().flatten() {
            if let Some(text) = run.pointer("/textRun/content").and_then(|t| t.as_str()) {
                out.push_str(text);
            }
        }
    }
    out
}
