//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one Drive folder:
//! listing → name filters → batches → per file (download → metadata
//! extraction → chunking → payload attach → upsert) → one completion
//! notification. With `notify_progress` a progress message is also sent
//! after every batch.
//!
//! Listing is the only fatal step. Every per-file error is caught, logged
//! and recorded in the [`IngestReport`]; sibling files always run.
//!
//! # Concurrency
//!
//! Batches run one after another. Inside a batch up to `parallelism` files
//! are in flight (`futures::stream::buffered`, so the report keeps listing
//! order). With the default `parallelism = 1` files are strictly sequential.
//! Metadata extraction is rate limited separately by the model's throttle.

use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::TextSplitter;
use crate::config::IngestionConfig;
use crate::connector_drive::NameFilter;
use crate::metadata::MetadataExtractor;
use crate::models::{chunk_payload, DriveFile, Provenance};
use crate::notify::send_progress_update;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};
use crate::store::VectorIndex;
use crate::traits::{DriveSource, Notifier};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub parallelism: usize,
    pub file_delay: Duration,
    pub skip_unchanged: bool,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub completion_message: String,
    pub notify_progress: bool,
}

impl IngestOptions {
    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            parallelism: config.parallelism.max(1),
            file_delay: Duration::from_millis(config.file_delay_ms),
            skip_unchanged: config.skip_unchanged,
            limit: None,
            dry_run: false,
            completion_message: config.completion_message.clone(),
            notify_progress: config.notify_progress,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// What happened to one listed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested { chunks: usize },
    /// Content hash already indexed (`skip_unchanged`).
    Unchanged,
    Skipped { reason: String },
    Failed { error: String },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Ingested { .. } => "ingested",
            FileOutcome::Unchanged => "unchanged",
            FileOutcome::Skipped { .. } => "skipped",
            FileOutcome::Failed { .. } => "failed",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FileOutcome::Ingested { chunks } => format!("ingested ({} chunks)", chunks),
            FileOutcome::Unchanged => "unchanged".to_string(),
            FileOutcome::Skipped { reason } => format!("skipped: {}", reason),
            FileOutcome::Failed { error } => format!("failed: {}", error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub file: DriveFile,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Files returned by the listing, before filters and limit.
    pub listed: usize,
    /// Files selected for processing.
    pub selected: usize,
    pub batches: usize,
    pub dry_run: bool,
    /// One entry per processed file, in listing order. Empty on dry runs.
    pub files: Vec<FileReport>,
}

impl IngestReport {
    fn count(&self, label: &str) -> usize {
        self.files
            .iter()
            .filter(|f| f.outcome.label() == label)
            .count()
    }

    pub fn ingested(&self) -> usize {
        self.count("ingested")
    }

    pub fn unchanged(&self) -> usize {
        self.count("unchanged")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn chunks(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.outcome {
                FileOutcome::Ingested { chunks } => chunks,
                _ => 0,
            })
            .sum()
    }

    /// One-line count summary, used in the completion notification.
    pub fn summary(&self) -> String {
        format!(
            "{} files: {} ingested ({} chunks), {} unchanged, {} skipped, {} failed",
            self.files.len(),
            self.ingested(),
            self.chunks(),
            self.unchanged(),
            self.skipped(),
            self.failed()
        )
    }
}

pub struct Ingestor {
    drive: Arc<dyn DriveSource>,
    extractor: Arc<MetadataExtractor>,
    splitter: TextSplitter,
    index: Arc<VectorIndex>,
    notifier: Arc<dyn Notifier>,
    filter: NameFilter,
    options: IngestOptions,
    progress: Box<dyn IngestProgressReporter>,
}

impl Ingestor {
    pub fn new(
        drive: Arc<dyn DriveSource>,
        extractor: Arc<MetadataExtractor>,
        splitter: TextSplitter,
        index: Arc<VectorIndex>,
        notifier: Arc<dyn Notifier>,
        options: IngestOptions,
    ) -> Self {
        Self {
            drive,
            extractor,
            splitter,
            index,
            notifier,
            filter: NameFilter::allow_all(),
            options,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_filter(mut self, filter: NameFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest every file directly under `folder_id`.
    pub async fn ingest(&self, folder_id: &str, batch_size: usize) -> Result<IngestReport> {
        if batch_size == 0 {
            bail!("batch_size must be >= 1");
        }

        self.progress.report(IngestProgressEvent::Listing {
            folder_id: folder_id.to_string(),
        });
        let listed = self
            .drive
            .list_files(folder_id)
            .await
            .with_context(|| format!("Failed to list Drive folder {}", folder_id))?;

        let listed_count = listed.len();
        let mut files: Vec<DriveFile> = listed
            .into_iter()
            .filter(|f| self.filter.matches(&f.name))
            .collect();
        if let Some(limit) = self.options.limit {
            files.truncate(limit);
        }

        let total = files.len();
        let batches = total.div_ceil(batch_size);
        tracing::info!(folder_id, listed = listed_count, selected = total, batches, "listed folder");

        let mut report = IngestReport {
            listed: listed_count,
            selected: total,
            batches,
            dry_run: self.options.dry_run,
            files: Vec::with_capacity(total),
        };
        if self.options.dry_run {
            return Ok(report);
        }

        let done = AtomicUsize::new(0);
        for (index, batch) in files.chunks(batch_size).enumerate() {
            self.progress.report(IngestProgressEvent::Batch {
                index: index + 1,
                total: batches,
            });
            tracing::info!(batch = index + 1, of = batches, files = batch.len(), "processing batch");

            let outcomes: Vec<FileOutcome> = stream::iter(batch.iter().map(|file| {
                let done = &done;
                async move {
                    let outcome = self.process_file(file).await;
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    self.progress.report(IngestProgressEvent::File {
                        n,
                        total,
                        name: file.name.clone(),
                        outcome: outcome.describe(),
                    });
                    if !self.options.file_delay.is_zero() {
                        tokio::time::sleep(self.options.file_delay).await;
                    }
                    outcome
                }
            }))
            .buffered(self.options.parallelism.max(1))
            .collect()
            .await;

            report
                .files
                .extend(batch.iter().cloned().zip(outcomes).map(|(file, outcome)| FileReport {
                    file,
                    outcome,
                }));

            if self.options.notify_progress {
                let done = report.files.len();
                let sent =
                    send_progress_update(self.notifier.as_ref(), done, total, "Ingesting files").await;
                if let Err(e) = sent {
                    tracing::debug!(error = %e, "progress notification failed");
                }
            }
        }

        tracing::info!(summary = %report.summary(), "ingestion finished");
        let message = format!("{}\n{}", self.options.completion_message, report.summary());
        if let Err(e) = self.notifier.notify(&message).await {
            tracing::warn!(error = %e, "completion notification failed");
        }

        Ok(report)
    }

    async fn process_file(&self, file: &DriveFile) -> FileOutcome {
        match self.try_process_file(file).await {
            Ok(outcome) => {
                tracing::info!(file_id = %file.id, name = %file.name, outcome = %outcome.describe(), "file done");
                outcome
            }
            Err(e) => {
                tracing::warn!(file_id = %file.id, name = %file.name, error = %format!("{:#}", e), "file failed");
                FileOutcome::Failed {
                    error: format!("{:#}", e),
                }
            }
        }
    }

    async fn try_process_file(&self, file: &DriveFile) -> Result<FileOutcome> {
        let content = match self
            .drive
            .download(file)
            .await
            .with_context(|| format!("download {}", file.name))?
        {
            Some(text) if !text.is_empty() => text,
            _ => {
                return Ok(FileOutcome::Skipped {
                    reason: "no content".to_string(),
                })
            }
        };

        let mut provenance = Provenance::for_file(file);
        if self.options.skip_unchanged {
            let hash = content_hash(&content);
            if self.index.count_for_file(&file.id, Some(&hash)).await? > 0 {
                return Ok(FileOutcome::Unchanged);
            }
            if self.index.count_for_file(&file.id, None).await? > 0 {
                tracing::info!(file_id = %file.id, "content changed, replacing records");
                self.index.try_delete_by_file_id(&file.id).await?;
            }
            provenance.content_hash = Some(hash);
        }

        let metadata = self.extractor.extract(&content).await;
        let chunks = self.splitter.split_text(&content);
        if chunks.is_empty() {
            return Ok(FileOutcome::Skipped {
                reason: "no chunks".to_string(),
            });
        }

        let payloads = chunks
            .iter()
            .map(|_| chunk_payload(&metadata, &provenance))
            .collect();
        self.index
            .upsert(&chunks, payloads)
            .await
            .with_context(|| format!("upsert {}", file.name))?;

        Ok(FileOutcome::Ingested {
            chunks: chunks.len(),
        })
    }
}

/// Hex SHA-256 of file content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels_and_text() {
        assert_eq!(FileOutcome::Ingested { chunks: 3 }.describe(), "ingested (3 chunks)");
        assert_eq!(FileOutcome::Unchanged.label(), "unchanged");
        assert_eq!(
            FileOutcome::Skipped { reason: "no content".into() }.describe(),
            "skipped: no content"
        );
    }

    #[test]
    fn report_counts() {
        let file = DriveFile::new("1", "a", "text/plain");
        let report = IngestReport {
            listed: 3,
            selected: 3,
            batches: 1,
            dry_run: false,
            files: vec![
                FileReport { file: file.clone(), outcome: FileOutcome::Ingested { chunks: 4 } },
                FileReport { file: file.clone(), outcome: FileOutcome::Ingested { chunks: 2 } },
                FileReport { file, outcome: FileOutcome::Failed { error: "x".into() } },
            ],
        };
        assert_eq!(report.ingested(), 2);
        assert_eq!(report.chunks(), 6);
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.summary(),
            "3 files: 2 ingested (6 chunks), 0 unchanged, 0 skipped, 1 failed"
        );
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("abc"));
        assert_ne!(h, content_hash("abd"));
    }
}
