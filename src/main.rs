//! # drive-rag CLI
//!
//! ## Usage
//!
//! ```bash
//! drive-rag --config ./config/drive-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `drive-rag init` | Create the vector collection if it does not exist |
//! | `drive-rag ingest` | Index the files of a Drive folder |
//! | `drive-rag search "<query>"` | Similarity search over indexed chunks |
//! | `drive-rag delete <file_id>...` | Delete indexed files after approval |
//! | `drive-rag chat` | Interactive chat with the retrieval agent |
//! | `drive-rag history` | Print or clear the chat transcript |
//! | `drive-rag history --new "<title>"` | Create a transcript document and print its id |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use drive_rag::app::{self, IngestArgs};
use drive_rag::config;
use drive_rag::logging;
use drive_rag::progress::ProgressMode;

/// Retrieval-augmented chat over Google Drive documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Secrets are read from the environment variables it names.
#[derive(Parser)]
#[command(name = "drive-rag", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/drive-rag.toml")]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector collection.
    ///
    /// Idempotent: an existing collection is left as is.
    Init,

    /// Index the files of a Drive folder.
    ///
    /// Every file is downloaded, summarised into metadata, chunked, embedded
    /// and upserted. Per-file failures are reported and do not stop the run.
    Ingest {
        /// Drive folder id (defaults to `ingestion.folder_id`).
        #[arg(long)]
        folder: Option<String>,

        /// Files per batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Files processed concurrently inside a batch.
        #[arg(long)]
        parallelism: Option<usize>,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// List and count only; nothing is written.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Similarity search over indexed chunks.
    Search {
        query: String,

        /// Number of results (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete every record of the given Drive file ids, after approval.
    Delete {
        #[arg(required = true)]
        file_ids: Vec<String>,
    },

    /// Interactive chat. `quit`/`exit` leaves, `clear` forgets the conversation.
    Chat,

    /// Print the chat transcript document.
    History {
        /// Empty the transcript instead of printing it.
        #[arg(long)]
        clear: bool,

        /// Create a new transcript document with this title and print its id.
        #[arg(long, value_name = "TITLE", conflicts_with = "clear")]
        new: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => app::run_init(&cfg).await?,
        Commands::Ingest {
            folder,
            batch_size,
            parallelism,
            limit,
            dry_run,
            progress,
        } => {
            app::run_ingest(
                &cfg,
                IngestArgs {
                    folder,
                    batch_size,
                    parallelism,
                    limit,
                    dry_run,
                    progress: progress.mode(),
                },
            )
            .await?
        }
        Commands::Search { query, limit } => app::run_search(&cfg, &query, limit).await?,
        Commands::Delete { file_ids } => app::run_delete(&cfg, &file_ids).await?,
        Commands::Chat => app::run_chat(&cfg).await?,
        Commands::History { clear, new } => match new {
            Some(title) => app::run_history_new(&cfg, &title).await?,
            None => app::run_history(&cfg, clear).await?,
        },
    }

    Ok(())
}
