//! Core data models.
//!
//! These types represent the files, metadata records and vector payloads
//! that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MIME type of native Google Docs, which must be exported rather than downloaded.
pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

/// A file listed in a Drive folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(rename = "modifiedTime", default)]
    pub modified_time: Option<String>,
}

/// How a file's text is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Google-native document exported as `text/plain`.
    ExportText,
    /// Raw bytes downloaded and run through text extraction.
    Download,
}

impl DriveFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            size: None,
            modified_time: None,
        }
    }

    pub fn fetch_mode(&self) -> FetchMode {
        if self.mime_type == GOOGLE_DOC_MIME {
            FetchMode::ExportText
        } else {
            FetchMode::Download
        }
    }
}

/// The six-field structured summary attached to every chunk of a document.
///
/// Every field is always present; anything the model did not supply stays
/// at its empty default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub overarching_theme: String,
    #[serde(default)]
    pub recurring_topics: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub analytical_insights: Vec<String>,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl DocumentMetadata {
    /// Field names in schema order.
    pub const FIELDS: [&'static str; 6] = [
        "overarching_theme",
        "recurring_topics",
        "pain_points",
        "analytical_insights",
        "conclusion",
        "keywords",
    ];

    /// Whether the named schema field holds a list.
    pub fn is_list_field(name: &str) -> bool {
        matches!(
            name,
            "recurring_topics" | "pain_points" | "analytical_insights" | "keywords"
        )
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Identity of the source file, merged into each chunk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub file_id: String,
    /// The file's display name, used as a pseudo-identity key.
    pub pubkey: String,
    /// SHA-256 of the file content when unchanged-file skipping is enabled.
    pub content_hash: Option<String>,
}

impl Provenance {
    pub fn for_file(file: &DriveFile) -> Self {
        Self {
            file_id: file.id.clone(),
            pubkey: file.name.clone(),
            content_hash: None,
        }
    }
}

/// Build the payload stored with one chunk: the six metadata fields plus
/// provenance keys. Provenance is added only for keys the metadata does not
/// already define, so extracted fields are never overwritten.
pub fn chunk_payload(metadata: &DocumentMetadata, provenance: &Provenance) -> Map<String, Value> {
    let mut payload = match serde_json::to_value(metadata) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    payload
        .entry("file_id")
        .or_insert_with(|| Value::String(provenance.file_id.clone()));
    payload
        .entry("pubkey")
        .or_insert_with(|| Value::String(provenance.pubkey.clone()));
    if let Some(hash) = &provenance.content_hash {
        payload
            .entry("content_hash")
            .or_insert_with(|| Value::String(hash.clone()));
    }
    payload
}

/// One vector record as written to the index backend.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub payload: Map<String, Value>,
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

impl SearchHit {
    pub fn file_id(&self) -> Option<&str> {
        self.payload.get("file_id").and_then(|v| v.as_str())
    }
}
