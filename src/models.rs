//! Core data types that flow through ingestion and answering.
//!
//! A [`Document`] is one revision of one corpus file. It is split into
//! [`Chunk`]s, each chunk is embedded, and the result is persisted as an
//! [`IndexEntry`]. Queries come back as [`SearchHit`]s and, after generation,
//! as an [`Answer`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ops::Range;

/// One revision of a corpus file.
#[derive(Debug, Clone)]
pub struct Document {
    /// SHA-256 of (normalized relative path, content bytes). Changes whenever
    /// the content changes.
    pub source_id: String,
    /// Normalized relative path (forward slashes). Stable across revisions.
    pub path: String,
    pub raw_text: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_id: String,
    pub ordinal: u32,
    /// Half-open range in chars (Unicode scalar values) of the parent text.
    pub char_span: Range<usize>,
    pub text: String,
}

/// A persisted chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub source_id: String,
    pub path: String,
    pub ordinal: u32,
    pub text: String,
    pub vector: Vec<f32>,
    pub model: String,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub source_id: String,
    pub path: String,
    pub ordinal: u32,
    pub text: String,
    pub similarity: f64,
}

/// An indexed source as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub source_id: String,
    pub path: String,
    pub chunk_count: usize,
}

/// Embedding model recorded for the whole index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexModel {
    pub model: String,
    pub dims: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub sources: usize,
    pub entries: usize,
    pub model: Option<IndexModel>,
}

/// A source cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub source_id: String,
    pub path: String,
    /// Best similarity among the included chunks of this source.
    pub similarity: f64,
}

/// Result of a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Generated from retrieved context.
    Grounded { text: String, citations: Vec<Citation> },
    /// Generated without context because ungrounded fallback is enabled.
    Ungrounded { text: String },
    /// Nothing relevant was found and ungrounded fallback is disabled.
    NoRelevantContext,
}

impl Answer {
    /// Answer text, if any was generated.
    pub fn text(&self) -> Option<&str> {
        match self {
            Answer::Grounded { text, .. } | Answer::Ungrounded { text } => Some(text),
            Answer::NoRelevantContext => None,
        }
    }

    pub fn citations(&self) -> &[Citation] {
        match self {
            Answer::Grounded { citations, .. } => citations,
            _ => &[],
        }
    }

    /// Cited source ids in citation order.
    pub fn source_ids(&self) -> Vec<&str> {
        self.citations().iter().map(|c| c.source_id.as_str()).collect()
    }

    pub fn status(&self) -> &'static str {
        match self {
            Answer::Grounded { .. } => "answered",
            Answer::Ungrounded { .. } => "ungrounded",
            Answer::NoRelevantContext => "no_relevant_context",
        }
    }
}
