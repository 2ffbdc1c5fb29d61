//! Retrieval tool: turns a query into a bounded context block.
//!
//! Runs a similarity search and renders each hit as
//!
//! ```text
//! Document 1:
//! <chunk text>
//! ```
//!
//! joined by blank lines. Payload metadata is not rendered. Rendering stops
//! before the first document that would push the block past
//! `max_context_chars`; the first document is always included.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::models::SearchHit;
use crate::store::VectorIndex;
use crate::traits::Tool;

pub const NO_RESULTS: &str = "No relevant information found.";

pub struct RetrievalTool {
    index: Arc<VectorIndex>,
    top_k: usize,
    max_context_chars: usize,
    name: String,
    description: String,
}

impl RetrievalTool {
    pub fn new(index: Arc<VectorIndex>, config: &RetrievalConfig) -> Self {
        Self {
            index,
            top_k: config.top_k,
            max_context_chars: config.max_context_chars,
            name: config.tool_name.clone(),
            description: config.tool_description.clone(),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Search and format. Never fails; search errors read as no results.
    pub async fn retrieve_context(&self, query: &str) -> String {
        let hits = self.index.search(query, self.top_k).await;
        tracing::debug!(query, hits = hits.len(), "retrieved context");
        format_context(&hits, self.max_context_chars)
    }
}

pub fn format_context(hits: &[SearchHit], max_chars: usize) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut out = String::new();
    let mut used = 0usize;
    for (i, hit) in hits.iter().enumerate() {
        let block = format!("Document {}:\n{}\n", i + 1, hit.text);
        let sep = if i == 0 { 0 } else { 1 };
        let len = block.chars().count() + sep;
        if i > 0 && used + len > max_chars {
            break;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&block);
        used += len;
    }
    out
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in the indexed documents"
                }
            },
            "required": ["query"]
        })
    }

    /// Accepts `{"query": "..."}` or a bare JSON string.
    async fn execute(&self, params: Value) -> Result<String> {
        let query = match &params {
            Value::String(s) => s.as_str(),
            other => match other.get("query").and_then(|q| q.as_str()) {
                Some(q) => q,
                None => bail!("missing required parameter: query"),
            },
        };
        Ok(self.retrieve_context(query).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn hit(text: &str) -> SearchHit {
        SearchHit {
            id: text.to_string(),
            text: text.to_string(),
            score: 1.0,
            payload: Map::new(),
        }
    }

    #[test]
    fn empty_is_sentinel() {
        assert_eq!(format_context(&[], 1000), NO_RESULTS);
    }

    #[test]
    fn documents_are_numbered_and_joined() {
        let out = format_context(&[hit("alpha"), hit("beta")], 1000);
        assert_eq!(out, "Document 1:\nalpha\n\nDocument 2:\nbeta\n");
    }

    #[test]
    fn budget_stops_before_overflow() {
        // "Document 1:\nalpha\n" is 18 chars.
        let out = format_context(&[hit("alpha"), hit("beta"), hit("gamma")], 30);
        assert_eq!(out, "Document 1:\nalpha\n");
    }

    #[test]
    fn first_document_always_included() {
        let out = format_context(&[hit(&"x".repeat(100))], 10);
        assert!(out.starts_with("Document 1:\n"));
    }
}
