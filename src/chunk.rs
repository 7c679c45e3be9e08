//! Overlapping, boundary-aware text chunker.
//!
//! Splits a [`Document`] into [`Chunk`]s of at most `max_chunk_chars`
//! characters. Consecutive chunks share `overlap_chars` characters so that a
//! sentence cut at a chunk edge is still seen whole by at least one chunk.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `max_chunk_chars`, emit it and stop.
//! 2. Otherwise look for a cut inside the boundary window
//!    `[start + max - window, start + max]`, trying separator tiers in
//!    order: paragraph break, line break, sentence end, word break. The cut
//!    goes right after the last separator of the first tier that has one.
//! 3. With no separator in the window, cut hard at `start + max`.
//! 4. The next chunk starts `overlap_chars` before the cut.
//!
//! Lengths and spans are counted in chars (Unicode scalar values), never in
//! bytes, so multi-byte text is never split inside a code point. Chunk text
//! is an exact slice of the document: nothing is trimmed, which is what makes
//! [`reassemble`] lossless.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::{split, ChunkParams};
//! # use docqa::models::Document;
//! # let doc = Document {
//! #     source_id: "s".into(), path: "a.txt".into(), raw_text: "Hello world.".into(),
//! #     content_type: "text/plain".into(), last_modified: chrono::Utc::now(),
//! # };
//! let params = ChunkParams::new(800, 120, None).unwrap();
//! let chunks = split(&doc, &params).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Hello world.");
//! ```

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document};

/// Separator tiers, most preferred first.
const SEPARATOR_TIERS: &[&[&str]] = &[
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? ", "; "],
    &[" ", "\t"],
];

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    max_chunk_chars: usize,
    overlap_chars: usize,
    boundary_window_chars: usize,
}

impl ChunkParams {
    /// Validate and build parameters.
    ///
    /// The boundary window defaults to a quarter of `max_chunk_chars` and is
    /// clamped so every cut lands past the previous chunk's overlap.
    pub fn new(
        max_chunk_chars: usize,
        overlap_chars: usize,
        boundary_window_chars: Option<usize>,
    ) -> Result<Self> {
        if max_chunk_chars == 0 {
            return Err(Error::config("max_chunk_chars must be > 0"));
        }
        if overlap_chars >= max_chunk_chars {
            return Err(Error::config(format!(
                "overlap_chars ({}) must be smaller than max_chunk_chars ({})",
                overlap_chars, max_chunk_chars
            )));
        }
        let requested = boundary_window_chars.unwrap_or((max_chunk_chars / 4).max(1));
        let limit = max_chunk_chars - overlap_chars - 1;
        Ok(Self {
            max_chunk_chars,
            overlap_chars,
            boundary_window_chars: requested.min(limit),
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(
            config.max_chunk_chars,
            config.overlap_chars,
            config.boundary_window_chars,
        )
    }

    pub fn max_chunk_chars(&self) -> usize {
        self.max_chunk_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }
}

/// Split a document into ordered chunks. Empty or whitespace-only documents
/// yield no chunks.
pub fn split(doc: &Document, params: &ChunkParams) -> Result<Vec<Chunk>> {
    let chars: Vec<char> = doc.raw_text.chars().collect();
    if chars.iter().all(|c| c.is_whitespace()) {
        return Ok(Vec::new());
    }

    let n = chars.len();
    let max = params.max_chunk_chars;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        if n - start <= max {
            chunks.push(make_chunk(&doc.source_id, chunks.len(), &chars, start, n));
            break;
        }

        let hi = start + max;
        let lo = hi - params.boundary_window_chars;
        let end = find_cut(&chars, lo, hi).unwrap_or(hi);
        chunks.push(make_chunk(&doc.source_id, chunks.len(), &chars, start, end));
        start = end - params.overlap_chars;
    }

    Ok(chunks)
}

/// Rebuild the original text from a document's chunks (in ordinal order),
/// dropping the characters each chunk shares with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.char_span.start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.char_span.end);
    }
    out
}

/// Deterministic chunk id: UUIDv5 over `"{source_id}:{ordinal}"`.
pub fn chunk_id(source_id: &str, ordinal: u32) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", source_id, ordinal).as_bytes(),
    )
    .to_string()
}

/// Latest cut position in `[lo, hi]` that directly follows a separator,
/// taking the first separator tier that matches anywhere in the window.
fn find_cut(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    for tier in SEPARATOR_TIERS {
        let best = tier
            .iter()
            .filter_map(|sep| last_cut_after(chars, sep, lo, hi))
            .max();
        if best.is_some() {
            return best;
        }
    }
    None
}

fn last_cut_after(chars: &[char], sep: &str, lo: usize, hi: usize) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    let lo = lo.max(sep.len());
    (lo..=hi)
        .rev()
        .find(|&cut| chars[cut - sep.len()..cut] == sep[..])
}

fn make_chunk(source_id: &str, ordinal: usize, chars: &[char], start: usize, end: usize) -> Chunk {
    let ordinal = ordinal as u32;
    Chunk {
        chunk_id: chunk_id(source_id, ordinal),
        source_id: source_id.to_string(),
        ordinal,
        char_span: start..end,
        text: chars[start..end].iter().collect(),
    }
}
