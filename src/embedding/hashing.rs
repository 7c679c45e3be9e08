//! Deterministic feature-hashing embedder.
//!
//! Each lowercase alphanumeric token is hashed (SHA-256) to a bucket and a
//! sign; the bucket counts form the vector, which is then L2-normalized.
//! Texts sharing vocabulary get high cosine similarity. There is no
//! semantics beyond that, but it needs no network or model download and is
//! stable across platforms and releases. Text with no tokens has no
//! direction and is refused rather than mapped to the zero vector.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::retry::CallError;

pub(super) const DEFAULT_DIMS: usize = 256;

pub struct HashProvider {
    model: String,
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(Error::config("embedding.dims must be > 0"));
        }
        Ok(Self {
            model: format!("hash-{}", dims),
            dims,
        })
    }

    /// Embed one text synchronously. `None` when the text has no tokens.
    pub fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        let mut seen = false;
        for token in tokens(text) {
            seen = true;
            let digest = Sha256::digest(token.as_bytes());
            let mut idx = [0u8; 8];
            idx.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        // Tokens can cancel out in a bucket; a fully cancelled vector is as
        // useless as an empty one.
        if !seen || norm == 0.0 {
            return None;
        }
        for x in &mut v {
            *x /= norm;
        }
        Some(v)
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        texts
            .iter()
            .map(|t| {
                self.embed_one(t)
                    .ok_or_else(|| CallError::Permanent("text has no indexable terms".to_string()))
            })
            .collect()
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
