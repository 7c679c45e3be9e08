//! # docqa
//!
//! Retrieval-augmented question answering over a local document corpus.
//!
//! docqa scans a directory of documents, splits each one into overlapping
//! chunks, embeds the chunks and keeps the vectors in a persistent index.
//! Questions are embedded the same way, matched against the index by cosine
//! similarity, and answered by a generation model that only sees the
//! retrieved passages. Every answer cites the sources it was built from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌────────────┐
//! │  Loader  │──▶│  Ingestor   │──▶│ VectorStore │
//! │ FS walk  │   │ Chunk+Embed │   │ SQLite/mem  │
//! └──────────┘   └─────────────┘   └─────┬──────┘
//!                                        │
//!                                  ┌─────▼──────┐
//!                                  │AnswerEngine│──▶ generation
//!                                  └─────┬──────┘
//!                             ┌──────────┴─────────┐
//!                             ▼                    ▼
//!                        ┌─────────┐          ┌─────────┐
//!                        │   CLI   │          │  HTTP   │
//!                        └─────────┘          └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                          # create the index database
//! docqa ingest                        # index the corpus
//! docqa search "capital of France"    # ranked passages
//! docqa ask "What is the capital of France?"
//! docqa serve                         # JSON HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`loader`] | Corpus scanning and source identity |
//! | [`extract`] | Text extraction for PDF, DOCX and plain text |
//! | [`chunk`] | Overlapping, boundary-aware chunking |
//! | [`embedding`] | Embedding providers and the retrying gateway |
//! | [`generation`] | Generation providers and the retrying gateway |
//! | [`retry`] | Transient/permanent failure classification and backoff |
//! | [`store`] | Vector index trait with SQLite and in-memory backends |
//! | [`ingest`] | Concurrent ingestion pipeline and reconciliation |
//! | [`answer`] | Retrieval, context packing and answer synthesis |
//! | [`server`] | JSON HTTP transport |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod retry;
pub mod server;
pub mod store;
