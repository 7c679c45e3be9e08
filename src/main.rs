//! # docqa CLI
//!
//! The `docqa` binary indexes a document corpus and answers questions over
//! it, from the terminal or through a JSON HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite index and run schema migrations |
//! | `docqa ingest` | Index new and changed documents, drop removed ones |
//! | `docqa search "<query>"` | Show the most similar passages |
//! | `docqa ask "<question>"` | Answer a question with citations |
//! | `docqa stats` | Index size, embedding model and indexed sources |
//! | `docqa serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Rebuild everything after switching embedding models
//! docqa ingest --full
//!
//! # See what an ingest would do without writing
//! docqa ingest --dry-run
//!
//! # Ask with debug logging
//! docqa -v ask "What is the capital of France?"
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docqa::answer::{AnswerEngine, RetrievalSettings};
use docqa::chunk::ChunkParams;
use docqa::config::{self, Config};
use docqa::embedding::EmbeddingGateway;
use docqa::generation::GenerationGateway;
use docqa::ingest::{CancelToken, IngestOptions, IngestSettings, Ingestor, SourceOutcome};
use docqa::loader::Loader;
use docqa::models::Answer;
use docqa::server;
use docqa::store::{SqliteStore, VectorStore};

/// docqa: question answering over your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite file (and parent directories) and runs schema
    /// migrations. Safe to run more than once.
    Init,

    /// Index the corpus.
    ///
    /// Scans `[corpus].root`, embeds documents that are new or changed and
    /// removes sources whose files are gone. Unchanged documents are not
    /// re-embedded. Ctrl-C stops scheduling new documents; work already
    /// written stays, and nothing is deleted.
    Ingest {
        /// Re-embed every document. Required after changing the embedding model.
        #[arg(long)]
        full: bool,

        /// Scan and chunk only; report what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the passages most similar to a query.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of passages (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        /// The question.
        query: String,
    },

    /// Show index statistics and the indexed sources.
    Stats,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("RUST_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("docqa=info,warn"),
            1 => EnvFilter::new("docqa=debug,info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { full, dry_run } => {
            run_ingest(&cfg, IngestOptions { full, dry_run }).await?;
        }
        Commands::Search { query, limit } => {
            let (engine, store) = build_engine(&cfg).await?;
            let k = limit.unwrap_or(cfg.retrieval.top_k);
            let hits = engine.search(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.3}] {} #{}", i + 1, hit.similarity, hit.path, hit.ordinal);
                println!("    {}", snippet(&hit.text, 200));
                println!("    source: {}", hit.source_id);
                println!();
            }
            store.close().await;
        }
        Commands::Ask { query } => {
            let (engine, store) = build_engine(&cfg).await?;
            let answer = engine.answer(&query).await?;
            print_answer(&answer);
            store.close().await;
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            let stats = store.stats().await?;
            println!("docqa index");
            println!("  database: {}", cfg.db.path.display());
            println!("  sources:  {}", stats.sources);
            println!("  entries:  {}", stats.entries);
            match &stats.model {
                Some(m) => println!("  model:    {} ({} dims)", m.model, m.dims),
                None => println!("  model:    (empty index)"),
            }
            let sources = store.sources().await?;
            if !sources.is_empty() {
                println!();
                for s in sources {
                    let short_id: String = s.source_id.chars().take(12).collect();
                    println!("  {:>5}  {}  {}", s.chunk_count, short_id, s.path);
                }
            }
            store.close().await;
        }
        Commands::Serve => {
            let (engine, _store) = build_engine(&cfg).await?;
            server::run_server(Arc::new(engine), &cfg.server.bind).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&cfg.db.path)
        .await
        .with_context(|| format!("opening index {}", cfg.db.path.display()))?;
    Ok(Arc::new(store))
}

/// Engine over the configured index. Fails before any query when the index
/// was built with a different embedding model.
async fn build_engine(cfg: &Config) -> anyhow::Result<(AnswerEngine, Arc<SqliteStore>)> {
    let store = open_store(cfg).await?;
    let engine = AnswerEngine::new(
        store.clone(),
        EmbeddingGateway::from_config(&cfg.embedding)?,
        GenerationGateway::from_config(&cfg.generation)?,
        RetrievalSettings::from(&cfg.retrieval),
    );
    engine.verify().await?;
    Ok((engine, store))
}

async fn run_ingest(cfg: &Config, options: IngestOptions) -> anyhow::Result<()> {
    let loader = Loader::new(&cfg.corpus)?;
    let store = open_store(cfg).await?;
    let ingestor = Ingestor::new(
        store.clone() as Arc<dyn VectorStore>,
        EmbeddingGateway::from_config(&cfg.embedding)?,
        ChunkParams::from_config(&cfg.chunking)?,
        IngestSettings {
            concurrency: cfg.ingest.concurrency,
        },
    );

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight documents");
            on_signal.cancel();
        }
    });

    let report = ingestor.run(&loader, options, &cancel).await?;
    store.close().await;

    if report.dry_run {
        println!("ingest {} (dry-run)", cfg.corpus.root.display());
    } else {
        println!("ingest {}", cfg.corpus.root.display());
    }
    println!("  scanned: {}", report.scanned);
    println!("  indexed: {}", report.indexed);
    println!("  unchanged: {}", report.unchanged);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    if report.cancelled > 0 {
        println!("  cancelled: {}", report.cancelled);
    }
    println!("  deleted: {}", report.deleted);
    println!("  chunks written: {}", report.chunks_written);
    for failure in report.failures() {
        if let SourceOutcome::Failed { error } = &failure.outcome {
            println!("  ! {}: {}", failure.path, error);
        }
    }

    if report.failed > 0 {
        anyhow::bail!("{} source(s) failed to ingest", report.failed);
    }
    if cancel.is_cancelled() {
        anyhow::bail!("ingest interrupted");
    }
    println!("ok");
    Ok(())
}

fn print_answer(answer: &Answer) {
    match answer {
        Answer::NoRelevantContext => {
            println!("No relevant documents were found for this question.");
        }
        Answer::Ungrounded { text } => {
            println!("{}", text);
            println!();
            println!("(not grounded in any indexed document)");
        }
        Answer::Grounded { text, citations } => {
            println!("{}", text);
            println!();
            println!("Sources:");
            for (i, c) in citations.iter().enumerate() {
                println!("  [{}] {} ({:.3})", i + 1, c.path, c.similarity);
            }
        }
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}
