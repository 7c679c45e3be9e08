//! In-memory [`VectorStore`].
//!
//! One `RwLock` guards the whole index, so replacing a source's chunk set is
//! a single map insert under the write lock. Search is brute-force cosine
//! similarity.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{check_model, check_query, group_by_source, rank, VectorStore};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{IndexEntry, IndexModel, IndexStats, SearchHit, SourceRecord};

#[derive(Default)]
struct State {
    /// Entries per source id, each sorted by ordinal.
    sources: BTreeMap<String, Vec<IndexEntry>>,
    model: Option<IndexModel>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::IndexUnavailable("in-memory index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::IndexUnavailable("in-memory index lock poisoned".to_string()))
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.write()?;
        let model = match check_model(state.model.as_ref(), entries)? {
            Some(m) => m,
            None => return Ok(()),
        };

        for (source_id, group) in group_by_source(entries) {
            let mut chunk_set: Vec<IndexEntry> = group.into_iter().cloned().collect();
            chunk_set.sort_by_key(|e| e.ordinal);
            state.sources.insert(source_id.to_string(), chunk_set);
        }
        state.model = Some(model);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: i64) -> Result<Vec<SearchHit>> {
        let state = self.read()?;
        check_query(query, k, state.model.as_ref())?;

        let hits = state
            .sources
            .values()
            .flatten()
            .map(|e| SearchHit {
                chunk_id: e.chunk_id.clone(),
                source_id: e.source_id.clone(),
                path: e.path.clone(),
                ordinal: e.ordinal,
                text: e.text.clone(),
                similarity: cosine_similarity(query, &e.vector) as f64,
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<()> {
        let mut state = self.write()?;
        state.sources.remove(source_id);
        if state.sources.is_empty() {
            state.model = None;
        }
        Ok(())
    }

    async fn sources(&self) -> Result<Vec<SourceRecord>> {
        let state = self.read()?;
        let mut records: Vec<SourceRecord> = state
            .sources
            .iter()
            .map(|(source_id, entries)| SourceRecord {
                source_id: source_id.clone(),
                path: entries.first().map(|e| e.path.clone()).unwrap_or_default(),
                chunk_count: entries.len(),
            })
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.source_id.cmp(&b.source_id)));
        Ok(records)
    }

    async fn index_model(&self) -> Result<Option<IndexModel>> {
        Ok(self.read()?.model.clone())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        state.sources.clear();
        state.model = None;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let state = self.read()?;
        Ok(IndexStats {
            sources: state.sources.len(),
            entries: state.sources.values().map(Vec::len).sum(),
            model: state.model.clone(),
        })
    }
}
