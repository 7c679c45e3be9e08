//! Embedding providers and the gateway that batches and retries them.
//!
//! An [`EmbeddingProvider`] performs exactly one external call per
//! [`embed`](EmbeddingProvider::embed) and never retries. The
//! [`EmbeddingGateway`] wraps a provider with batching, a [`RetryPolicy`]
//! and output validation, and is the only thing the rest of the crate talks
//! to.
//!
//! Providers:
//! - **[`HashProvider`]**: deterministic feature hashing, no network. The
//!   default; used by tests and air-gapped installs.
//! - **[`OpenAIProvider`]**: any OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed`.
//! - **`LocalProvider`**: in-process fastembed models (feature
//!   `local-embeddings`).
//!
//! Vector helpers for the SQLite store live here too:
//! [`vec_to_blob`], [`blob_to_vec`] and [`cosine_similarity`].
//!
//! # Example
//!
//! ```rust
//! use docqa::config::EmbeddingConfig;
//! use docqa::embedding::EmbeddingGateway;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let gateway = EmbeddingGateway::from_config(&EmbeddingConfig::default()).unwrap();
//! let vectors = gateway.embed_batch(&["hello world".to_string()]).await.unwrap();
//! assert_eq!(vectors[0].len(), gateway.dims());
//! # }
//! ```

mod hashing;
#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

pub use hashing::HashProvider;
#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;
pub use remote::{OllamaProvider, OpenAIProvider};

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::models::IndexModel;
use crate::retry::{CallError, RetryPolicy};

/// One embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded in the index (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed `texts` in one call, returning vectors in input order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError>;
}

/// Instantiate the provider named by `config.provider`.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"hash"` | [`HashProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashProvider::new(config.dims.unwrap_or(
            hashing::DEFAULT_DIMS,
        ))?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(Error::config(
            "local embedding provider requires building with --features local-embeddings",
        )),
        other => Err(Error::config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Batching, retrying, validating front end over an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy, batch_size: usize) -> Self {
        Self {
            provider,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        let policy = RetryPolicy::new(config.retry_max_attempts, config.timeout());
        Ok(Self::new(provider, policy, config.batch_size))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Model and dimension as recorded in index metadata.
    pub fn index_model(&self) -> IndexModel {
        IndexModel {
            model: self.model_name().to_string(),
            dims: self.dims(),
        }
    }

    /// Embed `texts`, one provider call per `batch_size` texts.
    ///
    /// Fails with [`Error::EmbeddingUnavailable`] when a batch fails
    /// permanently, exhausts its retries, or returns malformed output
    /// (wrong count, wrong dimension, non-finite values, zero vectors).
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self
                .policy
                .run("embedding", || self.provider.embed(batch))
                .await
                .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
            self.validate(batch.len(), &vectors)?;
            tracing::debug!(batch = batch.len(), model = self.model_name(), "embedded batch");
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
    }

    fn validate(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                expected
            )));
        }
        let dims = self.dims();
        for v in vectors {
            if v.len() != dims {
                return Err(Error::EmbeddingUnavailable(format!(
                    "provider returned a {}-dimensional vector, expected {}",
                    v.len(),
                    dims
                )));
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::EmbeddingUnavailable(
                    "provider returned non-finite values".to_string(),
                ));
            }
            if v.iter().all(|x| *x == 0.0) {
                return Err(Error::EmbeddingUnavailable(
                    "provider returned a zero vector".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use docqa::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-norm vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Provider scripted to fail a fixed number of times, or to misbehave.
    struct Scripted {
        failures: u32,
        permanent: bool,
        dims: usize,
        returned_dims: usize,
        calls: AtomicU32,
        batch_sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                permanent: false,
                dims: 3,
                returned_dims: 3,
                calls: AtomicU32::new(0),
                batch_sizes: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
            self.batch_sizes.lock().unwrap().push(texts.len());
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return if self.permanent {
                    Err(CallError::Permanent("HTTP 400".into()))
                } else {
                    Err(CallError::Transient("HTTP 503".into()))
                };
            }
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32; self.returned_dims])
                .collect())
        }
    }

    fn gateway(provider: Scripted, attempts: u32, batch_size: usize) -> (EmbeddingGateway, Arc<Scripted>) {
        let provider = Arc::new(provider);
        let policy = RetryPolicy::new(attempts, Duration::from_secs(1))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(2));
        (
            EmbeddingGateway::new(provider.clone(), policy, batch_size),
            provider,
        )
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let (gw, provider) = gateway(Scripted::new(0), 3, 2);
        let out = gw.embed_batch(&texts(5)).await.unwrap();
        assert_eq!(out.len(), 5);
        for (i, v) in out.iter().enumerate() {
            assert_eq!(v[0], (i + 1) as f32);
        }
        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (gw, provider) = gateway(Scripted::new(2), 3, 10);
        assert!(gw.embed_batch(&texts(2)).await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_embedding_unavailable() {
        let (gw, provider) = gateway(Scripted::new(10), 3, 10);
        let err = gw.embed_batch(&texts(2)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut scripted = Scripted::new(10);
        scripted.permanent = true;
        let (gw, provider) = gateway(scripted, 5, 10);
        let err = gw.embed_batch(&texts(1)).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let mut scripted = Scripted::new(0);
        scripted.returned_dims = 2;
        let (gw, _) = gateway(scripted, 1, 10);
        let err = gw.embed_batch(&texts(1)).await.unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[tokio::test]
    async fn test_zero_vector_rejected() {
        let (gw, _) = gateway(Scripted::new(0), 1, 10);
        let err = gw.embed_batch(&["abc".to_string(), String::new()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
        assert!(err.to_string().contains("zero vector"));
    }

    #[tokio::test]
    async fn test_embed_query_returns_single_vector() {
        let (gw, _) = gateway(Scripted::new(0), 1, 10);
        let v = gw.embed_query("abcd").await.unwrap();
        assert_eq!(v, vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let config = EmbeddingConfig {
            provider: "word2vec".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_provider(&config).err(),
            Some(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_orthogonal_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
