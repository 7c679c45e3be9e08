//! Chat-model generators over HTTP.

use async_trait::async_trait;

use super::{GenerationProvider, Prompt};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::retry::CallError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}

fn messages(prompt: &Prompt) -> serde_json::Value {
    serde_json::json!([
        { "role": "system", "content": prompt.system },
        { "role": "user", "content": prompt.user },
    ])
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

/// OpenAI-compatible chat completions (`POST {url}/chat/completions`).
pub struct OpenAIChat {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAIChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("generation.model required for openai provider"))?;
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
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, CallError> {
        let mut request = self.client.post(format!("{}/chat/completions", self.url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages(prompt),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json = post_json(request, &body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CallError::Permanent("invalid response: missing choices[0].message.content".into())
            })
    }
}

/// Ollama chat (`POST {url}/api/chat`, non-streaming).
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("generation.model required for ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
        Ok(Self {
            client: http_client()?,
            url: url.trim_end_matches('/').to_string(),
            model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, CallError> {
        let request = self.client.post(format!("{}/api/chat", self.url));
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages(prompt),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_json(request, &body).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| CallError::Permanent("invalid response: missing message.content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_layout() {
        let prompt = Prompt {
            system: "be brief".into(),
            user: "Context: ...".into(),
            question: "why?".into(),
            passages: vec![],
        };
        let m = messages(&prompt);
        assert_eq!(m[0]["role"], "system");
        assert_eq!(m[0]["content"], "be brief");
        assert_eq!(m[1]["role"], "user");
    }

    #[test]
    fn test_model_required() {
        let config = GenerationConfig {
            provider: "ollama".into(),
            ..GenerationConfig::default()
        };
        assert!(matches!(
            OllamaChat::new(&config).err(),
            Some(Error::Configuration(_))
        ));
    }
}
