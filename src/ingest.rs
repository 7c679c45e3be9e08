//! Ingestion coordinator.
//!
//! Drives every scanned document through
//! `Unseen → Scanned → Chunked → Embedded → Indexed`, several documents at a
//! time, then reconciles the index against what the scan saw.
//!
//! # Flow
//!
//! 1. **Pre-flight** (no writes yet): an empty corpus is a configuration
//!    error; so is an index built with a different embedding model, unless
//!    the run is `full`, in which case the index is cleared and rebuilt.
//! 2. **Per source**: a source whose `source_id` is already indexed is
//!    unchanged and stops at `Scanned` → `Indexed` (incremental mode only).
//!    Otherwise it is chunked, embedded and upserted. A failing stage halts
//!    that source and is recorded; the run moves on.
//! 3. **Reconcile**: after a complete, uncancelled scan, every indexed source
//!    the scan did not see is deleted. Sources whose path failed this run are
//!    kept, so a broken re-index never drops the last good revision.
//!
//! Concurrency is across sources and bounded by a semaphore; stages of one
//! source run in order. Cancellation is checked between stages.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::{split, ChunkParams};
use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::models::{Document, IndexEntry};
use crate::store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Unseen,
    Scanned,
    Chunked,
    Embedded,
    Indexed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Indexed { chunks: usize },
    /// Dry run: would be indexed with this many chunks.
    Planned { chunks: usize },
    Unchanged,
    Skipped { reason: String },
    Failed { error: String },
    Cancelled,
}

/// Where one source ended up in this run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceProgress {
    pub path: String,
    pub source_id: Option<String>,
    pub state: PipelineState,
    #[serde(flatten)]
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub deleted: usize,
    pub chunks_written: usize,
    /// Per-source progress, ordered by path.
    pub sources: Vec<SourceProgress>,
}

impl IngestReport {
    pub fn failures(&self) -> impl Iterator<Item = &SourceProgress> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
    }

    fn record(&mut self, progress: SourceProgress) {
        match &progress.outcome {
            SourceOutcome::Indexed { chunks } | SourceOutcome::Planned { chunks } => {
                self.indexed += 1;
                self.chunks_written += chunks;
            }
            SourceOutcome::Unchanged => self.unchanged += 1,
            SourceOutcome::Skipped { .. } => self.skipped += 1,
            SourceOutcome::Failed { .. } => self.failed += 1,
            SourceOutcome::Cancelled => self.cancelled += 1,
        }
        self.sources.push(progress);
    }
}

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Sources processed at once.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Re-embed every source and rebuild the index on a model change.
    pub full: bool,
    /// Scan and chunk only; write nothing.
    pub dry_run: bool,
}

pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    gateway: EmbeddingGateway,
    params: ChunkParams,
    settings: IngestSettings,
}

/// State shared by the tasks of one run.
struct Pass {
    store: Arc<dyn VectorStore>,
    gateway: EmbeddingGateway,
    params: ChunkParams,
    known: HashSet<String>,
    options: IngestOptions,
    cancel: CancelToken,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        gateway: EmbeddingGateway,
        params: ChunkParams,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            params,
            settings,
        }
    }

    /// Ingest everything `loader` yields.
    ///
    /// Per-source failures are recorded in the report; only pre-flight
    /// problems and failures reading or reconciling the index itself are
    /// returned as `Err`.
    pub async fn run(
        &self,
        loader: &Loader,
        options: IngestOptions,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        let mut scan = loader.scan().peekable();
        if scan.peek().is_none() {
            return Err(Error::config(format!(
                "corpus {} contains no matching documents",
                loader.root().display()
            )));
        }
        self.check_model(options).await?;

        let existing = self.store.sources().await?;
        let pass = Arc::new(Pass {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            params: self.params,
            known: existing.iter().map(|s| s.source_id.clone()).collect(),
            options,
            cancel: cancel.clone(),
        });

        tracing::info!(
            root = %loader.root().display(),
            indexed_sources = existing.len(),
            full = options.full,
            dry_run = options.dry_run,
            "ingest started"
        );

        let mut report = IngestReport {
            dry_run: options.dry_run,
            ..IngestReport::default()
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut failed_paths: Vec<String> = Vec::new();
        let mut incomplete = false;

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for item in scan {
            if cancel.is_cancelled() {
                incomplete = true;
                break;
            }
            let doc = match item {
                Ok(doc) => doc,
                Err(e) => {
                    let path = match &e {
                        Error::UnreadableSource { path, .. } => path.to_string_lossy().into_owned(),
                        _ => String::new(),
                    };
                    tracing::warn!(path = %path, error = %e, "skipping unreadable source");
                    failed_paths.push(path.clone());
                    report.record(SourceProgress {
                        path,
                        source_id: None,
                        state: PipelineState::Unseen,
                        outcome: SourceOutcome::Failed {
                            error: e.to_string(),
                        },
                    });
                    continue;
                }
            };
            report.scanned += 1;
            seen.insert(doc.source_id.clone());

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::IndexUnavailable(format!("ingest worker pool closed: {}", e)))?;
            let pass = pass.clone();
            tasks.spawn(async move {
                let progress = pass.process(doc).await;
                drop(permit);
                progress
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(progress) => {
                    if matches!(progress.outcome, SourceOutcome::Failed { .. }) {
                        failed_paths.push(progress.path.clone());
                    }
                    report.record(progress);
                }
                Err(e) => {
                    tracing::error!(error = %e, "ingest task aborted");
                    incomplete = true;
                    report.failed += 1;
                }
            }
        }
        report.sources.sort_by(|a, b| a.path.cmp(&b.path));

        if cancel.is_cancelled() {
            incomplete = true;
        }
        if !options.dry_run && !incomplete {
            for source in existing {
                if seen.contains(&source.source_id) || is_protected(&source.path, &failed_paths) {
                    continue;
                }
                self.store.delete_by_source(&source.source_id).await?;
                tracing::info!(path = %source.path, source_id = %source.source_id, "removed stale source");
                report.deleted += 1;
            }
        }

        tracing::info!(
            scanned = report.scanned,
            indexed = report.indexed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            deleted = report.deleted,
            chunks = report.chunks_written,
            "ingest finished"
        );
        Ok(report)
    }

    async fn check_model(&self, options: IngestOptions) -> Result<()> {
        let wanted = self.gateway.index_model();
        match self.store.index_model().await? {
            Some(recorded) if recorded != wanted => {
                if !options.full {
                    return Err(Error::config(format!(
                        "index was built with {} ({} dims) but embedding is configured as {} ({} dims); \
                         re-run ingest with --full to rebuild",
                        recorded.model, recorded.dims, wanted.model, wanted.dims
                    )));
                }
                if !options.dry_run {
                    tracing::info!(
                        from = %recorded.model,
                        to = %wanted.model,
                        "embedding model changed, clearing index"
                    );
                    self.store.clear().await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl Pass {
    async fn process(&self, doc: Document) -> SourceProgress {
        let mut progress = SourceProgress {
            path: doc.path.clone(),
            source_id: Some(doc.source_id.clone()),
            state: PipelineState::Scanned,
            outcome: SourceOutcome::Cancelled,
        };

        if !self.options.full && self.known.contains(&doc.source_id) {
            progress.state = PipelineState::Indexed;
            progress.outcome = SourceOutcome::Unchanged;
            return progress;
        }
        if self.cancel.is_cancelled() {
            return progress;
        }

        let chunks = match split(&doc, &self.params) {
            Ok(chunks) => chunks,
            Err(e) => return self.fail(progress, e),
        };
        progress.state = PipelineState::Chunked;
        if chunks.is_empty() {
            progress.outcome = SourceOutcome::Skipped {
                reason: "document contains no text".to_string(),
            };
            return progress;
        }
        if self.options.dry_run {
            progress.outcome = SourceOutcome::Planned {
                chunks: chunks.len(),
            };
            return progress;
        }
        if self.cancel.is_cancelled() {
            return progress;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match self.gateway.embed_batch(&texts).await {
            Ok(v) => v,
            Err(e) => return self.fail(progress, e),
        };
        progress.state = PipelineState::Embedded;
        if self.cancel.is_cancelled() {
            return progress;
        }

        let model = self.gateway.model_name().to_string();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_id: chunk.chunk_id,
                source_id: chunk.source_id,
                path: doc.path.clone(),
                ordinal: chunk.ordinal,
                text: chunk.text,
                vector,
                model: model.clone(),
            })
            .collect();
        let count = entries.len();
        if let Err(e) = self.store.upsert(&entries).await {
            return self.fail(progress, e);
        }

        tracing::debug!(path = %doc.path, chunks = count, "indexed source");
        progress.state = PipelineState::Indexed;
        progress.outcome = SourceOutcome::Indexed { chunks: count };
        progress
    }

    fn fail(&self, mut progress: SourceProgress, error: Error) -> SourceProgress {
        tracing::warn!(path = %progress.path, state = ?progress.state, error = %error, "source failed");
        progress.outcome = SourceOutcome::Failed {
            error: error.to_string(),
        };
        progress
    }
}

/// A source is kept when its path, or a directory containing it, failed
/// this run.
fn is_protected(path: &str, failed_paths: &[String]) -> bool {
    failed_paths.iter().any(|failed| {
        failed.is_empty()
            || path == failed
            || path
                .strip_prefix(failed.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorpusConfig;
    use crate::embedding::{EmbeddingProvider, HashProvider};
    use crate::retry::{CallError, RetryPolicy};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Hash embedder that refuses texts containing `marker`.
    struct RefuseMarked {
        inner: HashProvider,
        marker: &'static str,
    }

    #[async_trait]
    impl EmbeddingProvider for RefuseMarked {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
            if texts.iter().any(|t| t.contains(self.marker)) {
                return Err(CallError::Permanent("HTTP 400: rejected input".into()));
            }
            self.inner.embed(texts).await
        }
    }

    /// Hash embedder that trips `token` during its `nth` call.
    struct CancelDuringEmbed {
        inner: HashProvider,
        token: CancelToken,
        nth: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for CancelDuringEmbed {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
                self.token.cancel();
            }
            self.inner.embed(texts).await
        }
    }

    fn ingestor(store: Arc<InMemoryStore>) -> Ingestor {
        ingestor_with(store, Arc::new(HashProvider::new(64).unwrap()), 2)
    }

    fn ingestor_with(
        store: Arc<InMemoryStore>,
        provider: Arc<dyn EmbeddingProvider>,
        concurrency: usize,
    ) -> Ingestor {
        let gateway = EmbeddingGateway::new(provider, RetryPolicy::new(1, Duration::from_secs(5)), 16);
        Ingestor::new(
            store,
            gateway,
            ChunkParams::new(200, 40, None).unwrap(),
            IngestSettings { concurrency },
        )
    }

    fn loader(dir: &TempDir) -> Loader {
        Loader::new(&CorpusConfig::new(dir.path())).unwrap()
    }

    #[test]
    fn test_protected_paths() {
        let failed = vec!["docs/a.md".to_string(), "private".to_string()];
        assert!(is_protected("docs/a.md", &failed));
        assert!(is_protected("private/x.md", &failed));
        assert!(!is_protected("privateer.md", &failed));
        assert!(!is_protected("docs/b.md", &failed));
        assert!(is_protected("anything", &[String::new()]));
    }

    #[tokio::test]
    async fn test_whitespace_document_is_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blank.txt"), "   \n\n ").unwrap();
        fs::write(tmp.path().join("real.txt"), "Some real content.").unwrap();
        let store = Arc::new(InMemoryStore::new());
        let report = ingestor(store.clone())
            .run(&loader(&tmp), IngestOptions::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.stats().await.unwrap().sources, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "Alpha.").unwrap();
        let store = Arc::new(InMemoryStore::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = ingestor(store.clone())
            .run(&loader(&tmp), IngestOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(store.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_writing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "Alpha. ".repeat(100)).unwrap();
        let store = Arc::new(InMemoryStore::new());
        let report = ingestor(store.clone())
            .run(
                &loader(&tmp),
                IngestOptions {
                    full: false,
                    dry_run: true,
                },
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.indexed, 1);
        assert!(report.chunks_written > 1);
        assert_eq!(report.sources[0].state, PipelineState::Chunked);
        assert_eq!(store.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_halts_only_that_source() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("france.txt"), "Paris is the capital of France.").unwrap();
        fs::write(tmp.path().join("pasta.txt"), "Boil the pasta for nine minutes.").unwrap();
        fs::write(tmp.path().join("bread.txt"), "Knead the dough until smooth.").unwrap();
        let store = Arc::new(InMemoryStore::new());

        let refusing = RefuseMarked {
            inner: HashProvider::new(64).unwrap(),
            marker: "pasta",
        };
        let report = ingestor_with(store.clone(), Arc::new(refusing), 2)
            .run(&loader(&tmp), IngestOptions::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!((report.indexed, report.failed), (2, 1));
        let pasta = report.sources.iter().find(|s| s.path == "pasta.txt").unwrap();
        assert_eq!(pasta.state, PipelineState::Chunked);
        assert!(matches!(&pasta.outcome, SourceOutcome::Failed { error } if error.contains("HTTP 400")));
        let paths: Vec<String> = store.sources().await.unwrap().into_iter().map(|s| s.path).collect();
        assert_eq!(paths.len(), 2);
        assert!(!paths.contains(&"pasta.txt".to_string()));

        // The next run picks up only the source that failed.
        let report = ingestor(store.clone())
            .run(&loader(&tmp), IngestOptions::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!((report.indexed, report.unchanged, report.failed), (1, 2, 0));
        assert_eq!(store.stats().await.unwrap().sources, 3);
    }

    #[tokio::test]
    async fn test_document_without_terms_fails() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("rule.txt"), "--- *** ---").unwrap();
        fs::write(tmp.path().join("real.txt"), "Some real content.").unwrap();
        let store = Arc::new(InMemoryStore::new());
        let report = ingestor(store.clone())
            .run(&loader(&tmp), IngestOptions::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!((report.indexed, report.failed), (1, 1));
        let rule = report.sources.iter().find(|s| s.path == "rule.txt").unwrap();
        assert_eq!(rule.state, PipelineState::Chunked);
        assert_eq!(store.stats().await.unwrap().sources, 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_written_work() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("old.txt"), "An older revision of the corpus.").unwrap();
        let store = Arc::new(InMemoryStore::new());
        ingestor(store.clone())
            .run(&loader(&tmp), IngestOptions::default(), &CancelToken::new())
            .await
            .unwrap();
        fs::remove_file(tmp.path().join("old.txt")).unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            fs::write(tmp.path().join(format!("{}.txt", name)), format!("Document {} text.", name)).unwrap();
        }

        let cancel = CancelToken::new();
        let tripping = CancelDuringEmbed {
            inner: HashProvider::new(64).unwrap(),
            token: cancel.clone(),
            nth: 2,
            calls: AtomicU32::new(0),
        };
        let report = ingestor_with(store.clone(), Arc::new(tripping), 1)
            .run(&loader(&tmp), IngestOptions::default(), &cancel)
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(report.indexed, 1);
        assert!(report.cancelled >= 1);
        assert!(report.scanned < 5, "scan kept going after cancel");
        assert!(report
            .sources
            .iter()
            .any(|s| s.state == PipelineState::Embedded && s.outcome == SourceOutcome::Cancelled));
        // No reconciliation after a cancelled run: the vanished source stays.
        assert_eq!(report.deleted, 0);
        let paths: Vec<String> = store.sources().await.unwrap().into_iter().map(|s| s.path).collect();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"old.txt".to_string()));

        let report = ingestor(store.clone())
            .run(&loader(&tmp), IngestOptions::default(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!((report.indexed, report.unchanged, report.deleted), (4, 1, 1));
        assert_eq!(store.stats().await.unwrap().sources, 5);
    }
}
