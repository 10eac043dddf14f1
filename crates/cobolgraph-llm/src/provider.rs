use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for LLM operations. The orchestrator's retry executor layers
/// its own backoff around calls returning this type; providers themselves
/// make a single attempt and propagate the first error they hit.
pub type LLMResult<T> = anyhow::Result<T>;

/// Marker error a provider raises on a 429 response. Distinguishes a
/// rate-limit failure from any other transient error so call sites can map
/// it to `PipelineError::UpstreamRateLimited`, which the retry executor
/// exempts from the attempt budget.
#[derive(Debug)]
pub struct RateLimited;

impl fmt::Display for RateLimited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limited")
    }
}

impl std::error::Error for RateLimited {}

/// Whether an error returned by a provider call was a rate-limit response.
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RateLimited>().is_some()
}

/// Performance characteristics of an LLM provider, used to decide timeouts
/// and context budgeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCharacteristics {
    pub max_tokens: usize,
    pub avg_latency_ms: u64,
    pub supports_json_schema: bool,
}

/// A JSON schema constraining a structured response, enumerating permitted
/// enum values the way every call site in this pipeline requires (line
/// types, structure types, entity types, usage types, flow types).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Generation parameters. Temperature 0.0 is used for classification calls;
/// higher temperatures for free-form structural/entity/flow extraction, per
/// the LLM interface section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: usize,
    pub response_schema: Option<JsonSchemaSpec>,
}

impl GenerationConfig {
    pub fn classification(schema: JsonSchemaSpec) -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: 256,
            response_schema: Some(schema),
        }
    }

    pub fn extraction(schema: JsonSchemaSpec) -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 8192,
            response_schema: Some(schema),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
        }
    }
}

/// The response from a structured-JSON call: raw text (expected to be a
/// single JSON document) plus bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Main trait for LLM providers. Every call in this pipeline is a
/// JSON-schema-constrained structured call, so the trait exposes exactly
/// one generation entry point rather than the broader chat/tool-calling
/// surface a general-purpose assistant provider would need.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate_chat(
        &self,
        messages: &[Message],
        config: &GenerationConfig,
    ) -> LLMResult<LLMResponse>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn characteristics(&self) -> ProviderCharacteristics;
}


/// Convenience helper: build a single-user-message call and parse the
/// response as the requested type. Used by every stage's worker call site.
pub async fn generate_structured<T: for<'de> Deserialize<'de>>(
    provider: &dyn LLMProvider,
    prompt: String,
    config: GenerationConfig,
) -> LLMResult<T> {
    let messages = vec![Message {
        role: MessageRole::User,
        content: prompt,
    }];
    let response = provider.generate_chat(&messages, &config).await?;
    let parsed = serde_json::from_str(&response.content)
        .map_err(|e| anyhow::anyhow!("schema violation parsing {} response: {e}", provider.provider_name()))?;
    Ok(parsed)
}
