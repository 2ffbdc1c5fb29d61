//! # drive-rag
//!
//! Retrieval-augmented chat over the documents of a Google Drive folder.
//!
//! Files are listed from Drive, summarised into a six-field metadata record
//! by Gemini, split into overlapping chunks, embedded with OpenAI and stored
//! in Qdrant with the metadata as payload. A structured-chat agent answers
//! questions by retrieving the closest chunks, and appends every exchange to
//! a Google Docs transcript. Deleting indexed files requires approval
//! through Telegram.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Google Drive│──▶│ Ingestor             │──▶│  Qdrant   │
//! │  (listing)  │   │ metadata+chunk+embed │   │ (vectors) │
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                      ┌────────────────────────────┤
//!                      ▼                            ▼
//!                ┌────────────┐              ┌────────────┐
//!                │ ChatAgent  │──▶ Docs      │ Deletion   │──▶ Telegram
//!                │ + retrieval│   transcript │ workflow   │   approval
//!                └────────────┘              └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! drive-rag init                          # create the Qdrant collection
//! drive-rag ingest --folder <drive-id>    # index a Drive folder
//! drive-rag search "zaps and relays"      # raw similarity search
//! drive-rag chat                          # interactive agent
//! drive-rag delete <file-id>...           # approval-gated deletion
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | Collaborator traits |
//! | [`extract`] | PDF, DOCX and text extraction |
//! | [`chunk`] | Recursive character text splitter |
//! | [`metadata`] | Structured metadata extraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`store`] | Vector index adapter and backends |
//! | [`retrieve`] | Retrieval tool |
//! | [`delete`] | Approval-gated deletion |
//! | [`agent`] | Conversational agent |
//! | [`llm`] / [`embedding`] | Gemini and OpenAI clients |
//! | [`auth`] / [`connector_drive`] / [`history`] | Google APIs |
//! | [`notify`] | Telegram and console notifiers |

pub mod agent;
pub mod app;
pub mod auth;
pub mod chunk;
pub mod config;
pub mod connector_drive;
pub mod delete;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod history;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod notify;
pub mod progress;
pub mod retrieve;
pub mod store;
pub mod traits;
