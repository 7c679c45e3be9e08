//! Persistent vector index.
//!
//! The [`VectorStore`] trait is the only way the ingest and answer paths
//! touch index entries. Two backends implement it:
//!
//! - [`InMemoryStore`]: a `BTreeMap` behind an `RwLock`, for tests and
//!   ephemeral use.
//! - [`SqliteStore`]: SQLite via sqlx (WAL), the persisted index.
//!
//! # Contract
//!
//! - `upsert` replaces the full chunk set of every source it touches, in one
//!   atomic step: a concurrent reader sees either all old or all new chunks.
//! - All entries share one embedding model and dimension. The first write to
//!   an empty index records them; later writes must match or fail with
//!   [`Error::Configuration`]. Metadata is dropped when the last entry goes.
//! - `search` ranks by cosine similarity, descending, ties broken by ordinal
//!   then source id, both ascending.
//! - Storage failures surface as [`Error::IndexUnavailable`]. Stores never
//!   retry.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::models::{IndexEntry, IndexModel, IndexStats, SearchHit, SourceRecord};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace the chunk sets of every source present in `entries`.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()>;

    /// The `k` entries most similar to `query`.
    async fn search(&self, query: &[f32], k: i64) -> Result<Vec<SearchHit>>;

    /// Remove every entry of `source_id`. Deleting an unknown source is a
    /// no-op.
    async fn delete_by_source(&self, source_id: &str) -> Result<()>;

    /// Indexed sources ordered by path, then source id.
    async fn sources(&self) -> Result<Vec<SourceRecord>>;

    async fn index_model(&self) -> Result<Option<IndexModel>>;

    /// Remove all entries and metadata.
    async fn clear(&self) -> Result<()>;

    async fn stats(&self) -> Result<IndexStats>;
}

/// Group entries by source id, keeping input order within a group.
pub(crate) fn group_by_source(entries: &[IndexEntry]) -> BTreeMap<&str, Vec<&IndexEntry>> {
    let mut groups: BTreeMap<&str, Vec<&IndexEntry>> = BTreeMap::new();
    for e in entries {
        groups.entry(e.source_id.as_str()).or_default().push(e);
    }
    groups
}

/// Model all of `entries` agree on, checked against the recorded one.
pub(crate) fn check_model(
    recorded: Option<&IndexModel>,
    entries: &[IndexEntry],
) -> Result<Option<IndexModel>> {
    let first = match entries.first() {
        Some(e) => IndexModel {
            model: e.model.clone(),
            dims: e.vector.len(),
        },
        None => return Ok(None),
    };
    if first.dims == 0 {
        return Err(Error::config("cannot index zero-dimensional vectors"));
    }
    for e in entries {
        if e.model != first.model || e.vector.len() != first.dims {
            return Err(Error::config(format!(
                "mixed embeddings in one write: {} ({} dims) and {} ({} dims)",
                first.model,
                first.dims,
                e.model,
                e.vector.len()
            )));
        }
    }
    if let Some(recorded) = recorded {
        if *recorded != first {
            return Err(Error::config(format!(
                "index was built with {} ({} dims) but this write uses {} ({} dims); \
                 re-ingest with --full to rebuild",
                recorded.model, recorded.dims, first.model, first.dims
            )));
        }
    }
    Ok(Some(first))
}

/// Reject bad search arguments before touching any entry.
pub(crate) fn check_query(query: &[f32], k: i64, recorded: Option<&IndexModel>) -> Result<()> {
    if k <= 0 {
        return Err(Error::InvalidQuery(format!("k must be positive, got {}", k)));
    }
    if let Some(model) = recorded {
        if query.len() != model.dims {
            return Err(Error::InvalidQuery(format!(
                "query vector has {} dims, index has {}",
                query.len(),
                model.dims
            )));
        }
    }
    Ok(())
}

/// Sort hits into result order and keep the first `k`.
pub(crate) fn rank(mut hits: Vec<SearchHit>, k: i64) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    hits.truncate(usize::try_from(k).unwrap_or(usize::MAX));
    hits
}
