//! Ingestion progress reporting.
//!
//! Reports what `drive-rag ingest` is doing: the folder being listed, the
//! batch in flight and the outcome of every file. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts, and independently of
//! the `tracing` log output.

use std::io::Write;

/// A single progress event for ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Listing the folder. Total unknown.
    Listing { folder_id: String },
    /// Batch `index` (1-based) of `total` is starting.
    Batch { index: usize, total: usize },
    /// File `n` (1-based) of `total` finished with `outcome`.
    File {
        n: usize,
        total: usize,
        name: String,
        outcome: String,
    },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  12 / 1,234  npub1abc  ingested (4 chunks)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Listing { folder_id } => {
                format!("ingest {}  listing...\n", folder_id)
            }
            IngestProgressEvent::Batch { index, total } => {
                format!("ingest  batch {} / {}\n", index, total)
            }
            IngestProgressEvent::File {
                n,
                total,
                name,
                outcome,
            } => format!(
                "ingest  {} / {}  {}  {}\n",
                format_number(*n as u64),
                format_number(*total as u64),
                name,
                outcome
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &IngestProgressEvent) -> serde_json::Value {
    match event {
        IngestProgressEvent::Listing { folder_id } => serde_json::json!({
            "event": "progress",
            "phase": "listing",
            "folder_id": folder_id,
        }),
        IngestProgressEvent::Batch { index, total } => serde_json::json!({
            "event": "progress",
            "phase": "batch",
            "index": index,
            "total": total,
        }),
        IngestProgressEvent::File {
            n,
            total,
            name,
            outcome,
        } => serde_json::json!({
            "event": "progress",
            "phase": "file",
            "n": n,
            "total": total,
            "name": name,
            "outcome": outcome,
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
