use crate::provider::*;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for OpenAI Chat Completions-compatible endpoints (local
/// model servers, self-hosted gateways). Kept separate from
/// [`crate::anthropic::AnthropicConfig`] since the wire format differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatibleConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    pub provider_name: String,
}

impl OpenAiCompatibleConfig {
    pub fn custom(base_url: String, model: String, provider_name: String) -> Self {
        Self {
            base_url,
            model,
            timeout_secs: 120,
            api_key: None,
            provider_name,
        }
    }

    pub fn ollama(model: String) -> Self {
        Self::custom(
            "http://localhost:11434/v1".to_string(),
            model,
            "ollama".to_string(),
        )
    }
}

/// OpenAI Chat Completions-compatible provider. Performs exactly one HTTP
/// attempt per call, matching [`crate::anthropic::AnthropicProvider`] —
/// the orchestrator owns retry and backoff policy.
pub struct OpenAiCompatibleProvider {
    config: OpenAiCompatibleConfig,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatibleProvider {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            response_format: config
                .response_schema
                .as_ref()
                .map(|_| ResponseFormat {
                    format_type: "json_object".to_string(),
                }),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("content-type", "application/json");
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .context("failed to send request to OpenAI-compatible endpoint")?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(anyhow::Error::new(RateLimited));
        }
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(anyhow!(
                "{} API error ({status}): {text}",
                self.config.provider_name
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse chat completion response")?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} returned no choices", self.config.provider_name))?;

        Ok(LLMResponse {
            content: choice.message.content,
            model: parsed.model,
            finish_reason: choice.finish_reason,
        })
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: 128_000,
            avg_latency_ms: 500,
            supports_json_schema: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_config_defaults_to_local_endpoint() {
        let config = OpenAiCompatibleConfig::ollama("llama3".to_string());
        assert_eq!(config.base_url, "http://localhost:11434/v1");
        assert_eq!(config.provider_name, "ollama");
    }

    #[test]
    fn provider_builds_from_config() {
        let config = OpenAiCompatibleConfig::custom(
            "http://localhost:1234/v1".to_string(),
            "local-model".to_string(),
            "lmstudio".to_string(),
        );
        assert!(OpenAiCompatibleProvider::new(config).is_ok());
    }
}
