//! Answer generation providers and their retrying gateway.
//!
//! A [`GenerationProvider`] turns a [`Prompt`] into answer text with one
//! external call. [`GenerationGateway`] adds the shared [`RetryPolicy`] and
//! maps exhaustion to [`Error::GenerationUnavailable`].
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"extractive"` | [`ExtractiveGenerator`] (offline, deterministic) |
//! | `"openai"` | [`OpenAIChat`] (`/chat/completions`) |
//! | `"ollama"` | [`OllamaChat`] (`/api/chat`) |

mod extractive;
mod remote;

pub use extractive::ExtractiveGenerator;
pub use remote::{OllamaChat, OpenAIChat};

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::retry::{CallError, RetryPolicy};

/// A fully assembled request for a generator.
///
/// `system` and `user` are what chat models receive. `question` and
/// `passages` carry the same content in structured form for generators that
/// do not read free text.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub question: String,
    pub passages: Vec<String>,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, CallError>;
}

pub fn create_provider(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "extractive" => Ok(Arc::new(ExtractiveGenerator::default())),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => Err(Error::config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

#[derive(Clone)]
pub struct GenerationGateway {
    provider: Arc<dyn GenerationProvider>,
    policy: RetryPolicy,
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn GenerationProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        let policy = RetryPolicy::new(config.retry_max_attempts, config.timeout());
        Ok(Self::new(provider, policy))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let text = self
            .policy
            .run("generation", || self.provider.generate(prompt))
            .await
            .map_err(|e| Error::GenerationUnavailable(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}
