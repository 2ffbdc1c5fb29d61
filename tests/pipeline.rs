//! Ingestion pipeline end to end against in-memory collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{memory_index, Approval, FakeDrive, RecordingNotifier, ScriptedModel, METADATA_REPLY};
use drive_rag::chunk::TextSplitter;
use drive_rag::config::MetadataConfig;
use drive_rag::connector_drive::NameFilter;
use drive_rag::ingest::{content_hash, FileOutcome, IngestOptions, Ingestor};
use drive_rag::metadata::MetadataExtractor;
use drive_rag::models::DriveFile;
use drive_rag::store::memory::InMemoryBackend;
use drive_rag::store::VectorIndex;

fn options() -> IngestOptions {
    IngestOptions {
        file_delay: Duration::ZERO,
        ..IngestOptions::default()
    }
}

struct Harness {
    backend: Arc<InMemoryBackend>,
    index: Arc<VectorIndex>,
    notifier: Arc<RecordingNotifier>,
    model: Arc<ScriptedModel>,
}

impl Harness {
    fn new() -> Self {
        let (backend, index) = memory_index();
        Self {
            backend,
            index,
            notifier: RecordingNotifier::new(Approval::Approve),
            model: ScriptedModel::constant(METADATA_REPLY),
        }
    }

    fn ingestor(&self, drive: Arc<FakeDrive>, options: IngestOptions) -> Ingestor {
        Ingestor::new(
            drive,
            Arc::new(MetadataExtractor::new(self.model.clone(), &MetadataConfig::default())),
            TextSplitter::new(200, 20).unwrap(),
            self.index.clone(),
            self.notifier.clone(),
            options,
        )
    }

    fn records_for(&self, file_id: &str) -> usize {
        self.backend
            .points()
            .iter()
            .filter(|p| p.payload.get("file_id").and_then(|v| v.as_str()) == Some(file_id))
            .count()
    }
}

// ─── Batching and per-file isolation ───────────────────────────────

#[tokio::test]
async fn test_seven_files_two_batches_with_empty_file_skipped() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(7));
    drive.set_content("f3", Some(""));

    let report = h
        .ingestor(drive, options())
        .ingest("folder", 5)
        .await
        .unwrap();

    assert_eq!(report.listed, 7);
    assert_eq!(report.batches, 2);
    assert_eq!(report.files.len(), 7);
    assert_eq!(report.ingested(), 6);
    assert_eq!(report.skipped(), 1);
    assert!(matches!(report.files[2].outcome, FileOutcome::Skipped { .. }));
    assert_eq!(h.records_for("f3"), 0);
    for id in ["f1", "f2", "f4", "f5", "f6", "f7"] {
        assert_eq!(h.records_for(id), 1, "records for {}", id);
    }

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Qdrant vector store upsert completed"));
    assert!(messages[0].contains("6 ingested"));
}

#[tokio::test]
async fn test_progress_messages_per_batch() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(7));
    let opts = IngestOptions {
        notify_progress: true,
        ..options()
    };

    h.ingestor(drive, opts).ingest("folder", 5).await.unwrap();

    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], "📊 Ingesting files\nProgress: 5/7 (71.4%)");
    assert_eq!(messages[1], "📊 Ingesting files\nProgress: 7/7 (100.0%)");
    assert!(messages[2].starts_with("Qdrant vector store upsert completed"));
}

#[tokio::test]
async fn test_missing_content_is_skipped() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(2));
    drive.set_content("f2", None);

    let report = h.ingestor(drive, options()).ingest("folder", 10).await.unwrap();

    assert_eq!(report.ingested(), 1);
    assert_eq!(report.files[1].outcome.label(), "skipped");
    assert_eq!(h.backend.len(), 1);
}

#[tokio::test]
async fn test_whitespace_only_content_is_ingested() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(2));
    drive.set_content("f2", Some("   \n"));

    let report = h.ingestor(drive, options()).ingest("folder", 10).await.unwrap();

    assert_eq!(report.ingested(), 2);
    assert!(matches!(report.files[1].outcome, FileOutcome::Ingested { chunks: 1 }));
    assert_eq!(h.records_for("f2"), 1);
}

#[tokio::test]
async fn test_download_failure_does_not_stop_run() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(4).failing_download("f2"));

    let report = h.ingestor(drive, options()).ingest("folder", 2).await.unwrap();

    assert_eq!(report.ingested(), 3);
    assert_eq!(report.failed(), 1);
    match &report.files[1].outcome {
        FileOutcome::Failed { error } => assert!(error.contains("download failed")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.records_for("f2"), 0);
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(3).failing_listing());

    let err = h
        .ingestor(drive, options())
        .ingest("folder", 5)
        .await
        .unwrap_err();

    assert!(format!("{:#}", err).contains("Failed to list Drive folder folder"));
    assert!(h.notifier.messages().is_empty());
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn test_zero_batch_size_rejected() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(1));
    assert!(h.ingestor(drive, options()).ingest("folder", 0).await.is_err());
}

// ─── Payloads ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_payload_carries_metadata_and_provenance() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(1));

    h.ingestor(drive, options()).ingest("folder", 5).await.unwrap();

    let points = h.backend.points();
    assert_eq!(points.len(), 1);
    let payload = &points[0].payload;
    assert_eq!(payload["file_id"], "f1");
    assert_eq!(payload["pubkey"], "npub1");
    assert_eq!(payload["overarching_theme"], "Decentralized social media");
    assert_eq!(payload["keywords"][1], "damus");
    assert!(payload.get("content_hash").is_none());
    assert_eq!(points[0].text, "Profile 1 talks about relays and zaps.");
}

#[tokio::test]
async fn test_unparseable_metadata_still_indexes() {
    let h = Harness {
        model: ScriptedModel::constant("I'd rather not."),
        ..Harness::new()
    };
    let drive = Arc::new(FakeDrive::numbered(1));

    let report = h.ingestor(drive, options()).ingest("folder", 5).await.unwrap();

    assert_eq!(report.ingested(), 1);
    let payload = &h.backend.points()[0].payload;
    assert_eq!(payload["overarching_theme"], "");
    assert_eq!(payload["file_id"], "f1");
}

#[tokio::test]
async fn test_long_file_splits_into_chunks_sharing_metadata() {
    let h = Harness::new();
    let body = "Relays carry notes between clients.\n\n".repeat(20);
    let drive = Arc::new(FakeDrive::new(vec![(
        DriveFile::new("long", "npub-long", "text/plain"),
        Some(body),
    )]));

    let report = h.ingestor(drive, options()).ingest("folder", 5).await.unwrap();

    let chunks = match report.files[0].outcome {
        FileOutcome::Ingested { chunks } => chunks,
        ref other => panic!("unexpected outcome {:?}", other),
    };
    assert!(chunks > 1);
    assert_eq!(h.records_for("long"), chunks);
    assert!(h.backend.points().iter().all(|p| p.text.chars().count() <= 200));
    assert_eq!(h.model.calls(), 1);
}

// ─── Re-ingestion ──────────────────────────────────────────────────

#[tokio::test]
async fn test_rerun_without_skip_duplicates_records() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(3));

    h.ingestor(drive.clone(), options()).ingest("folder", 5).await.unwrap();
    h.ingestor(drive, options()).ingest("folder", 5).await.unwrap();

    assert_eq!(h.backend.len(), 6);
    assert_eq!(h.records_for("f1"), 2);
}

#[tokio::test]
async fn test_skip_unchanged_leaves_same_content_alone() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(3));
    let opts = IngestOptions {
        skip_unchanged: true,
        ..options()
    };

    let first = h.ingestor(drive.clone(), opts.clone()).ingest("folder", 5).await.unwrap();
    assert_eq!(first.ingested(), 3);
    let calls_after_first = h.model.calls();

    let second = h.ingestor(drive, opts).ingest("folder", 5).await.unwrap();
    assert_eq!(second.unchanged(), 3);
    assert_eq!(second.ingested(), 0);
    assert_eq!(h.backend.len(), 3);
    assert_eq!(h.model.calls(), calls_after_first);

    let expected = content_hash("Profile 2 talks about relays and zaps.");
    let point = h
        .backend
        .points()
        .into_iter()
        .find(|p| p.payload["file_id"] == "f2")
        .unwrap();
    assert_eq!(point.payload["content_hash"], expected.as_str());
}

#[tokio::test]
async fn test_skip_unchanged_replaces_changed_file() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(2));
    let opts = IngestOptions {
        skip_unchanged: true,
        ..options()
    };

    h.ingestor(drive.clone(), opts.clone()).ingest("folder", 5).await.unwrap();
    drive.set_content("f1", Some("Profile 1 now only posts about lightning."));

    let report = h.ingestor(drive, opts).ingest("folder", 5).await.unwrap();

    assert_eq!(report.files[0].outcome, FileOutcome::Ingested { chunks: 1 });
    assert_eq!(report.files[1].outcome, FileOutcome::Unchanged);
    assert_eq!(h.records_for("f1"), 1);
    let texts: Vec<String> = h.backend.points().into_iter().map(|p| p.text).collect();
    assert!(texts.contains(&"Profile 1 now only posts about lightning.".to_string()));
    assert!(!texts.contains(&"Profile 1 talks about relays and zaps.".to_string()));
}

// ─── Selection ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_name_filter_and_limit() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::new(vec![
        (DriveFile::new("a", "npub_a.txt", "text/plain"), Some("alpha notes".into())),
        (DriveFile::new("b", "draft_b.txt", "text/plain"), Some("beta notes".into())),
        (DriveFile::new("c", "npub_c.txt", "text/plain"), Some("gamma notes".into())),
        (DriveFile::new("d", "npub_d.txt", "text/plain"), Some("delta notes".into())),
    ]));
    let filter = NameFilter::new(&["npub_*".to_string()], &["*_d.txt".to_string()]).unwrap();
    let opts = IngestOptions {
        limit: Some(1),
        ..options()
    };

    let report = h
        .ingestor(drive.clone(), opts)
        .with_filter(filter)
        .ingest("folder", 5)
        .await
        .unwrap();

    assert_eq!(report.listed, 4);
    assert_eq!(report.selected, 1);
    assert_eq!(report.files[0].file.id, "a");
    assert_eq!(*drive.downloads.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(6));
    let opts = IngestOptions {
        dry_run: true,
        ..options()
    };

    let report = h.ingestor(drive.clone(), opts).ingest("folder", 4).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.selected, 6);
    assert_eq!(report.batches, 2);
    assert!(report.files.is_empty());
    assert!(drive.downloads.lock().unwrap().is_empty());
    assert!(h.backend.is_empty());
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn test_parallel_batches_keep_listing_order() {
    let h = Harness::new();
    let drive = Arc::new(FakeDrive::numbered(9));
    let opts = IngestOptions {
        parallelism: 4,
        ..options()
    };

    let report = h.ingestor(drive, opts).ingest("folder", 5).await.unwrap();

    let ids: Vec<&str> = report.files.iter().map(|f| f.file.id.as_str()).collect();
    assert_eq!(ids, vec!["f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9"]);
    assert_eq!(report.ingested(), 9);
    assert_eq!(h.backend.len(), 9);
}

// ─── Collection bootstrap ──────────────────────────────────────────

#[tokio::test]
async fn test_ensure_collection_creates_once() {
    let (backend, index) = memory_index();

    assert!(index.ensure_collection(16).await.unwrap());
    assert!(!index.ensure_collection(16).await.unwrap());
    assert_eq!(backend.create_calls(), 1);
}
