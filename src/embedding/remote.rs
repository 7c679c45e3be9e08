//! HTTP embedding providers.
//!
//! Both providers make exactly one request per [`embed`] call and classify
//! failures for the gateway's retry policy: 429 and 5xx are transient,
//! other 4xx are permanent, network errors are transient and a malformed
//! body is permanent.
//!
//! [`embed`]: super::EmbeddingProvider::embed

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::retry::CallError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

fn required_model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config.model.clone().ok_or_else(|| {
        Error::config(format!("embedding.model required for {} provider", provider))
    })?;
    let dims = config.dims.ok_or_else(|| {
        Error::config(format!("embedding.dims required for {} provider", provider))
    })?;
    Ok((model, dims))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> std::result::Result<serde_json::Value, CallError> {
    let response = request.json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(CallError::from_status(status, &text));
    }
    Ok(response.json().await?)
}

fn parse_vector(value: &serde_json::Value) -> std::result::Result<Vec<f32>, CallError> {
    value
        .as_array()
        .ok_or_else(|| CallError::Permanent("embedding is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| CallError::Permanent("embedding contains a non-number".to_string()))
        })
        .collect()
}

// ============ OpenAI-compatible ============

/// Embeddings from `POST {url}/embeddings`.
///
/// The API key is read from the environment variable named by
/// `embedding.api_key_env`. It is required for the default OpenAI endpoint
/// and optional when `embedding.url` points elsewhere.
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "openai")?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() && config.url.is_none() {
            return Err(Error::config(format!(
                "{} environment variable not set",
                config.api_key_env
            )));
        }
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());

        Ok(Self {
            client: http_client()?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        let mut request = self.client.post(format!("{}/embeddings", self.url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(request, &body).await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, CallError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| CallError::Permanent("invalid response: missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| CallError::Permanent("invalid response: missing embedding".to_string()))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embeddings from a local Ollama instance (`POST {url}/api/embed`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
        Ok(Self {
            client: http_client()?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        let request = self.client.post(format!("{}/api/embed", self.url));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(request, &body).await.map_err(|e| match e {
            CallError::Transient(msg) => CallError::Transient(format!(
                "Ollama at {}: {}",
                self.url, msg
            )),
            permanent => permanent,
        })?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, CallError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            CallError::Permanent("invalid response: missing embeddings array".to_string())
        })?
        .iter()
        .map(parse_vector)
        .collect()
}
