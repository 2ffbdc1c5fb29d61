//! Google Drive connector.
//!
//! Lists the files of a Drive folder through the Drive v3 REST API and
//! fetches their text. Native Google Docs are exported as `text/plain`;
//! every other file is downloaded raw and handed to [`crate::extract`]
//! with its MIME type. A file whose text cannot be extracted is reported
//! as having no content, which the ingestor records as a skip.
//!
//! # Pagination
//!
//! Folders with more than one page of files are followed through
//! `nextPageToken` until the listing is complete.
//!
//! # Name filters
//!
//! [`NameFilter`] applies `include_globs` / `exclude_globs` from
//! `[ingestion]` to file names after listing:
//!
//! ```toml
//! [ingestion]
//! include_globs = ["npub*"]
//! exclude_globs = ["*.pdf"]
//! ```

use anyhow::Result;
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::sync::Arc;

use crate::auth::TokenSource;
use crate::error::ServiceError;
use crate::extract;
use crate::http;
use crate::models::{DriveFile, FetchMode};
use crate::traits::DriveSource;

const SERVICE: &str = "drive";
const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, modifiedTime)";
const PAGE_SIZE: &str = "1000";
const MAX_RETRIES: u32 = 3;

// ═══════════════════════════════════════════════════════════════════════
// DriveSource implementation
// ═══════════════════════════════════════════════════════════════════════

pub struct GoogleDriveSource {
    tokens: Arc<TokenSource>,
    client: reqwest::Client,
    base_url: String,
}

impl GoogleDriveSource {
    pub fn new(tokens: Arc<TokenSource>, client: reqwest::Client) -> Self {
        Self {
            tokens,
            client,
            base_url: DRIVE_API.to_string(),
        }
    }

    /// Point the client at another API root (e.g. a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn content_url(&self, file: &DriveFile) -> (String, Vec<(&'static str, &'static str)>) {
        let url = match file.fetch_mode() {
            FetchMode::ExportText => format!("{}/files/{}/export", self.base_url, file.id),
            FetchMode::Download => format!("{}/files/{}", self.base_url, file.id),
        };
        let query = match file.fetch_mode() {
            FetchMode::ExportText => vec![("mimeType", "text/plain")],
            FetchMode::Download => vec![("alt", "media")],
        };
        (url, query)
    }
}

#[async_trait]
impl DriveSource for GoogleDriveSource {
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>, ServiceError> {
        let url = format!("{}/files", self.base_url);
        let q = folder_query(folder_id);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.tokens.access_token().await?;
            let json = http::send_json_with_retry(SERVICE, MAX_RETRIES, || {
                let mut query = vec![
                    ("q", q.as_str()),
                    ("fields", LIST_FIELDS),
                    ("pageSize", PAGE_SIZE),
                ];
                if let Some(ref t) = page_token {
                    query.push(("pageToken", t.as_str()));
                }
                self.client.get(&url).bearer_auth(&token).query(&query)
            })
            .await?;

            let (batch, next) = parse_list_page(&json)?;
            tracing::debug!(folder_id, page_files = batch.len(), "listed drive page");
            files.extend(batch);

            match next {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }

        Ok(files)
    }

    async fn download(&self, file: &DriveFile) -> Result<Option<String>, ServiceError> {
        let token = self.tokens.access_token().await?;
        let (url, query) = self.content_url(file);
        let response = http::send(
            SERVICE,
            self.client.get(&url).bearer_auth(&token).query(&query),
        )
        .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;
        Ok(decode_content(file, &bytes))
    }
}

// ============ Wire format ============

/// Drive search expression for the non-trashed children of a folder.
pub fn folder_query(folder_id: &str) -> String {
    format!("'{}' in parents and trashed=false", folder_id.replace('\'', "\\'"))
}

/// Parse one `files.list` page into files and the next page token.
pub fn parse_list_page(json: &Value) -> Result<(Vec<DriveFile>, Option<String>), ServiceError> {
    let files = json
        .get("files")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let files: Vec<DriveFile> = serde_json::from_value(files)
        .map_err(|e| ServiceError::malformed(SERVICE, format!("bad files array: {}", e)))?;
    let next = json
        .get("nextPageToken")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(String::from);
    Ok((files, next))
}

/// Turn fetched bytes into document text. Only an empty result counts as
/// absent; extraction failures are logged and reported as absent too.
pub fn decode_content(file: &DriveFile, bytes: &[u8]) -> Option<String> {
    let mime_type = match file.fetch_mode() {
        FetchMode::ExportText => "text/plain",
        FetchMode::Download => file.mime_type.as_str(),
    };
    match extract::extract_text(bytes, mime_type) {
        Ok(text) if text.is_empty() => None,
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(file = %file.name, mime_type, error = %e, "no text extracted");
            None
        }
    }
}

// ============ Name filters ============

/// Include/exclude glob filter over file names. An empty include list
/// admits every name.
pub struct NameFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl NameFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let include = if include_globs.is_empty() {
            None
        } else {
            Some(build_globset(include_globs)?)
        };
        Ok(Self {
            include,
            exclude: build_globset(exclude_globs)?,
        })
    }

    pub fn allow_all() -> Self {
        Self {
            include: None,
            exclude: GlobSet::empty(),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.exclude.is_match(name) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(name))
    }
}

/// Build a [`GlobSet`] from a list of glob pattern strings.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
