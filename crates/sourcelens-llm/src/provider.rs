//! LLM providers
//!
//! Three backends behind one capability: a self-hosted model server exposing
//! an OpenAI-compatible chat endpoint, hosted OpenAI, and hosted Anthropic.
//! Provider-specific request shapes never leak past this module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::{LlmConfig, ProviderKind};
use std::sync::Arc;
use std::time::Duration;

/// Default sampling temperature when neither job nor env specify one
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
/// Reply token budget
pub const DEFAULT_MAX_TOKENS: usize = 4096;
/// HTTP timeout for completion calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The rendered prompt
    pub prompt: String,
    /// Optional system instruction
    pub system: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Reply token budget
    pub max_tokens: usize,
}

/// Capability shared by every backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider label for logs and result records
    fn name(&self) -> &str;

    /// Model name in use
    fn model(&self) -> &str;

    /// Send a prompt, receive the raw reply text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Process-wide provider defaults; per-project overrides come in the job
/// config and never mutate these.
#[derive(Debug, Clone, Default)]
pub struct LlmSettings {
    /// `LLM_DEFAULT_TEMPERATURE`
    pub default_temperature: Option<f32>,
    /// `OPENAI_API_KEY`
    pub openai_api_key: Option<String>,
    /// `ANTHROPIC_API_KEY`
    pub anthropic_api_key: Option<String>,
    /// `LOCAL_LLM_BASE_URL`
    pub local_base_url: Option<String>,
}

impl LlmSettings {
    /// Read provider defaults from the environment
    pub fn from_env() -> Self {
        Self {
            default_temperature: std::env::var("LLM_DEFAULT_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            local_base_url: std::env::var("LOCAL_LLM_BASE_URL").ok(),
        }
    }

    /// Effective temperature for a job
    pub fn temperature(&self, job_override: Option<f32>) -> f32 {
        job_override
            .or(self.default_temperature)
            .unwrap_or(DEFAULT_TEMPERATURE)
    }
}

/// Build the provider a job's config selects, falling back to process-wide
/// defaults for credentials and endpoints
pub fn build_provider(
    config: &LlmConfig,
    settings: &LlmSettings,
) -> Result<Arc<dyn LlmProvider>> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::llm(format!("failed to build http client: {e}")))?;

    match config.provider {
        ProviderKind::Local => {
            let base_url = config
                .base_url
                .clone()
                .or_else(|| settings.local_base_url.clone())
                .ok_or_else(|| {
                    Error::validation("llm_config.base_url", "local provider needs a base url")
                })?;
            Ok(Arc::new(OpenAiCompatProvider {
                client,
                name: "local",
                endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
                api_key: config.api_key.clone(),
                model: config.model.clone(),
            }))
        }
        ProviderKind::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| settings.openai_api_key.clone())
                .ok_or_else(|| {
                    Error::validation("llm_config.api_key", "openai provider needs an api key")
                })?;
            Ok(Arc::new(OpenAiCompatProvider {
                client,
                name: "openai",
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                api_key: Some(api_key),
                model: config.model.clone(),
            }))
        }
        ProviderKind::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| settings.anthropic_api_key.clone())
                .ok_or_else(|| {
                    Error::validation("llm_config.api_key", "anthropic provider needs an api key")
                })?;
            Ok(Arc::new(AnthropicProvider {
                client,
                api_key,
                model: config.model.clone(),
            }))
        }
    }
}

// --- OpenAI-compatible chat completions (hosted OpenAI and local servers) ---

struct OpenAiCompatProvider {
    client: reqwest::Client,
    name: &'static str,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let mut http = self.client.post(&self.endpoint).json(&ChatRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        });
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| Error::llm(format!("{} request failed: {e}", self.name)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::llm(format!("{} returned {status}: {body}", self.name)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("{} reply did not parse: {e}", self.name)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::llm(format!("{} reply had no choices", self.name)))
    }
}

// --- Anthropic messages API ---

struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&AnthropicRequest {
                model: &self.model,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                system: request.system.as_deref(),
                messages: vec![ChatMessage {
                    role: "user",
                    content: &request.prompt,
                }],
            })
            .send()
            .await
            .map_err(|e| Error::llm(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::llm(format!("anthropic returned {status}: {body}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::llm(format!("anthropic reply did not parse: {e}")))?;
        let text = parsed
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(Error::llm("anthropic reply had no text blocks"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: ProviderKind) -> LlmConfig {
        LlmConfig {
            provider,
            model: "test-model".into(),
            temperature: None,
            api_key: Some("key".into()),
            base_url: Some("http://localhost:8000".into()),
        }
    }

    #[test]
    fn test_build_each_provider() {
        let settings = LlmSettings::default();
        for kind in [ProviderKind::Local, ProviderKind::OpenAi, ProviderKind::Anthropic] {
            let provider = build_provider(&config(kind), &settings).unwrap();
            assert_eq!(provider.model(), "test-model");
        }
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let settings = LlmSettings::default();
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.api_key = None;
        assert!(build_provider(&cfg, &settings).is_err());

        let mut cfg = config(ProviderKind::Local);
        cfg.base_url = None;
        assert!(build_provider(&cfg, &settings).is_err());
    }

    #[test]
    fn test_settings_fallback_supplies_credentials() {
        let settings = LlmSettings {
            openai_api_key: Some("env-key".into()),
            ..Default::default()
        };
        let mut cfg = config(ProviderKind::OpenAi);
        cfg.api_key = None;
        assert!(build_provider(&cfg, &settings).is_ok());
    }

    #[test]
    fn test_temperature_precedence() {
        let settings = LlmSettings {
            default_temperature: Some(0.4),
            ..Default::default()
        };
        assert_eq!(settings.temperature(Some(0.9)), 0.9);
        assert_eq!(settings.temperature(None), 0.4);
        assert_eq!(LlmSettings::default().temperature(None), DEFAULT_TEMPERATURE);
    }
}
