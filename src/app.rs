//! Command implementations and collaborator wiring.
//!
//! Each `run_*` function backs one CLI subcommand: it builds the
//! collaborators it needs from [`Config`], does the work and prints results
//! on stdout. Diagnostics go through `tracing` on stderr.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::ChatAgent;
use crate::auth::TokenSource;
use crate::chunk::TextSplitter;
use crate::config::Config;
use crate::connector_drive::{GoogleDriveSource, NameFilter};
use crate::delete::{DeleteOutcome, DeletionOutcome, DeletionWorkflow};
use crate::embedding::create_embedder;
use crate::history::GoogleDocsStore;
use crate::ingest::{IngestOptions, Ingestor};
use crate::llm::create_model;
use crate::metadata::MetadataExtractor;
use crate::notify::{ConsoleNotifier, TelegramNotifier};
use crate::progress::ProgressMode;
use crate::retrieve::RetrievalTool;
use crate::store::memory::InMemoryBackend;
use crate::store::qdrant::QdrantBackend;
use crate::store::VectorIndex;
use crate::traits::{DocumentStore, Notifier, Tool, VectorBackend};

// ============ Wiring ============

pub fn build_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let embedder = create_embedder(&config.embedding)?;
    let backend: Arc<dyn VectorBackend> = match config.index.backend.as_str() {
        "qdrant" => Arc::new(QdrantBackend::new(&config.index)?),
        "memory" => Arc::new(InMemoryBackend::new(config.index.collection.clone())),
        other => bail!("Unknown index backend: {}", other),
    };
    Ok(Arc::new(VectorIndex::new(backend, embedder)))
}

/// Build the index and make sure its collection exists. Failure here is
/// fatal for every command that touches the index.
pub async fn open_index(config: &Config) -> Result<Arc<VectorIndex>> {
    let index = build_index(config)?;
    index
        .ensure_collection(config.embedding.dims)
        .await
        .with_context(|| {
            format!(
                "Failed to initialize vector store collection '{}'",
                config.index.collection
            )
        })?;
    Ok(index)
}

pub fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    match &config.telegram {
        Some(telegram) => Ok(Arc::new(TelegramNotifier::from_config(telegram)?)),
        None => {
            tracing::debug!("no [telegram] section, notifications go to the console");
            Ok(Arc::new(ConsoleNotifier))
        }
    }
}

fn google_tokens(config: &Config) -> Result<Arc<TokenSource>> {
    let tokens = TokenSource::from_config(&config.google)
        .context("Google credentials unavailable")?;
    Ok(Arc::new(tokens))
}

fn google_client(config: &Config) -> Result<reqwest::Client> {
    Ok(crate::http::client(config.google.timeout_secs)?)
}

fn history_store(config: &Config) -> Result<Option<(Arc<dyn DocumentStore>, String)>> {
    let doc_id = match &config.history.document_id {
        Some(id) => id.clone(),
        None => return Ok(None),
    };
    let store: Arc<dyn DocumentStore> = Arc::new(GoogleDocsStore::new(
        google_tokens(config)?,
        google_client(config)?,
    ));
    Ok(Some((store, doc_id)))
}

pub fn build_agent(config: &Config, index: Arc<VectorIndex>) -> Result<ChatAgent> {
    let model = create_model(&config.llm)?;
    let tool: Arc<dyn Tool> = Arc::new(RetrievalTool::new(index, &config.retrieval));
    let mut agent = ChatAgent::new(model, vec![tool], &config.agent);
    if let Some((store, doc_id)) = history_store(config)? {
        agent = agent.with_history(store, doc_id);
    }
    Ok(agent)
}

// ============ Commands ============

pub async fn run_init(config: &Config) -> Result<()> {
    let index = build_index(config)?;
    let created = index
        .ensure_collection(config.embedding.dims)
        .await
        .context("Failed to initialize vector store")?;
    if created {
        println!(
            "Created collection '{}' ({} dims, cosine).",
            index.collection_name(),
            config.embedding.dims
        );
    } else {
        println!("Collection '{}' already exists.", index.collection_name());
    }
    Ok(())
}

pub struct IngestArgs {
    pub folder: Option<String>,
    pub batch_size: Option<usize>,
    pub parallelism: Option<usize>,
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

pub async fn run_ingest(config: &Config, args: IngestArgs) -> Result<()> {
    let folder_id = match args.folder.or_else(|| config.ingestion.folder_id.clone()) {
        Some(id) => id,
        None => bail!("No Drive folder given. Pass --folder or set ingestion.folder_id."),
    };
    let batch_size = args.batch_size.unwrap_or(config.ingestion.batch_size);

    let mut options = IngestOptions::from_config(&config.ingestion);
    if let Some(p) = args.parallelism {
        if p == 0 {
            bail!("--parallelism must be >= 1");
        }
        options.parallelism = p;
    }
    options.limit = args.limit;
    options.dry_run = args.dry_run;

    let index = open_index(config).await?;
    let drive = Arc::new(GoogleDriveSource::new(google_tokens(config)?, google_client(config)?));
    let extractor = Arc::new(MetadataExtractor::new(create_model(&config.llm)?, &config.metadata));
    let splitter = TextSplitter::from_config(&config.chunking)?;
    let filter = NameFilter::new(
        &config.ingestion.include_globs,
        &config.ingestion.exclude_globs,
    )?;

    let ingestor = Ingestor::new(drive, extractor, splitter, index, build_notifier(config)?, options)
        .with_filter(filter)
        .with_progress(args.progress.reporter());

    let report = ingestor.ingest(&folder_id, batch_size).await?;

    if report.dry_run {
        println!("ingest {} (dry-run)", folder_id);
        println!("  files listed: {}", report.listed);
        println!("  files selected: {}", report.selected);
        println!("  batches: {}", report.batches);
        return Ok(());
    }

    println!("ingest {}", folder_id);
    println!("  files listed: {}", report.listed);
    println!("  batches: {}", report.batches);
    println!("  ingested: {}", report.ingested());
    println!("  chunks written: {}", report.chunks());
    println!("  unchanged: {}", report.unchanged());
    println!("  skipped: {}", report.skipped());
    println!("  failed: {}", report.failed());
    for file in report.files.iter().filter(|f| f.outcome.label() == "failed") {
        println!("    {} ({}): {}", file.file.name, file.file.id, file.outcome.describe());
    }
    println!("ok");
    Ok(())
}

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let index = open_index(config).await?;
    let k = limit.unwrap_or(config.retrieval.top_k);
    let hits = index.try_search(query, k).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        let snippet: String = hit.text.chars().take(240).collect();
        println!(
            "{}. [{:.3}] {} (file_id: {})",
            i + 1,
            hit.score,
            hit.payload
                .get("pubkey")
                .and_then(|p| p.as_str())
                .unwrap_or("-"),
            hit.file_id().unwrap_or("-")
        );
        println!("    {}", snippet.replace('\n', " "));
    }
    Ok(())
}

pub async fn run_delete(config: &Config, file_ids: &[String]) -> Result<()> {
    if file_ids.is_empty() {
        bail!("No file ids given.");
    }
    let index = open_index(config).await?;
    let workflow = DeletionWorkflow::new(
        index,
        build_notifier(config)?,
        Duration::from_secs(config.approval_timeout_secs()),
    );

    match workflow.run(file_ids).await {
        DeletionOutcome::Declined => println!("Deletion declined. Nothing was deleted."),
        DeletionOutcome::Completed(outcomes) => {
            for DeleteOutcome { file_id, result } in &outcomes {
                match result {
                    Ok(()) => println!("  deleted {}", file_id),
                    Err(e) => println!("  failed  {}: {}", file_id, e),
                }
            }
            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            println!("Deleted {} of {} file ids.", outcomes.len() - failed, outcomes.len());
        }
    }
    Ok(())
}

pub async fn run_chat(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let agent = build_agent(config, index)?;

    println!("{}", "=".repeat(60));
    println!("RAG Chatbot - Nostr User Profiles");
    println!("{}", "=".repeat(60));
    println!("Type 'quit' or 'exit' to end the conversation");
    println!("Type 'clear' to clear conversation memory");
    println!("{}\n", "=".repeat(60));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                println!("\nGoodbye!");
                break;
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input.to_lowercase().as_str() {
            "quit" | "exit" => {
                println!("Goodbye!");
                break;
            }
            "clear" => {
                agent.clear();
                println!("Conversation memory cleared.");
                continue;
            }
            _ => {}
        }

        let answer = agent.chat(input).await;
        println!("\nAssistant: {}\n", answer);
    }
    Ok(())
}

/// Create a new transcript document. Its id goes into `history.document_id`.
pub async fn run_history_new(config: &Config, title: &str) -> Result<()> {
    let store = GoogleDocsStore::new(google_tokens(config)?, google_client(config)?);
    let doc_id = store
        .create_document(title)
        .await
        .with_context(|| format!("Failed to create document '{}'", title))?;
    println!("Created document: {} (ID: {})", title, doc_id);
    println!("Set history.document_id = \"{}\" to use it.", doc_id);
    Ok(())
}

pub async fn run_history(config: &Config, clear: bool) -> Result<()> {
    let (store, doc_id) = match history_store(config)? {
        Some(h) => h,
        None => bail!("history.document_id is not set"),
    };

    if clear {
        store.clear(&doc_id).await?;
        println!("Chat history cleared.");
        return Ok(());
    }

    match store.read_all(&doc_id).await? {
        Some(text) => println!("{}", text),
        None => println!("Chat history is empty."),
    }
    Ok(())
}
