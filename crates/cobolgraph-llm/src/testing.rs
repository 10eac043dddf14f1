use crate::provider::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A scripted [`LLMProvider`] double used by every stage's offline tests.
/// Each call consumes the next scripted response; a response of `Err`
/// simulates a terminal per-call failure so failure-default paths can be
/// exercised without a live endpoint.
pub struct FakeLlmProvider {
    responses: Mutex<Vec<Result<String, String>>>,
    calls: AtomicUsize,
}

impl FakeLlmProvider {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for FakeLlmProvider {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(anyhow::anyhow!("FakeLlmProvider exhausted"));
        }
        match responses.remove(0) {
            Ok(content) => Ok(LLMResponse {
                content,
                model: self.model_name().to_string(),
                finish_reason: Some("stop".to_string()),
            }),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }

    fn provider_name(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: 100_000,
            avg_latency_ms: 0,
            supports_json_schema: true,
        }
    }
}

/// A provider that returns the same canned response to every call,
/// regardless of how many times it is invoked. Useful for stage-1 line
/// classification fan-out tests where every call returns `{"type":"CODE"}`.
pub struct StaticLlmProvider {
    response: String,
    calls: AtomicUsize,
}

impl StaticLlmProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for StaticLlmProvider {
    async fn generate_chat(
        &self,
        _messages: &[Message],
        _config: &GenerationConfig,
    ) -> LLMResult<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LLMResponse {
            content: self.response.clone(),
            model: self.model_name().to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    fn provider_name(&self) -> &str {
        "static"
    }

    fn model_name(&self) -> &str {
        "static-model"
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            max_tokens: 100_000,
            avg_latency_ms: 0,
            supports_json_schema: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GenerationConfig {
        GenerationConfig::classification(JsonSchemaSpec {
            name: "test".to_string(),
            schema: serde_json::json!({}),
        })
    }

    #[tokio::test]
    async fn fake_provider_returns_scripted_responses_in_order() {
        let provider = FakeLlmProvider::new(vec![
            Ok("{\"type\":\"CODE\"}".to_string()),
            Ok("{\"type\":\"COMMENT\"}".to_string()),
        ]);
        let messages = vec![Message {
            role: MessageRole::User,
            content: "line".to_string(),
        }];
        let first = provider.generate_chat(&messages, &config()).await.unwrap();
        assert_eq!(first.content, "{\"type\":\"CODE\"}");
        let second = provider.generate_chat(&messages, &config()).await.unwrap();
        assert_eq!(second.content, "{\"type\":\"COMMENT\"}");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn fake_provider_propagates_scripted_errors() {
        let provider = FakeLlmProvider::new(vec![Err("rate limited (429)".to_string())]);
        let messages = vec![Message {
            role: MessageRole::User,
            content: "line".to_string(),
        }];
        let result = provider.generate_chat(&messages, &config()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fake_provider_errors_once_exhausted() {
        let provider = FakeLlmProvider::new(vec![]);
        let messages = vec![Message {
            role: MessageRole::User,
            content: "line".to_string(),
        }];
        assert!(provider.generate_chat(&messages, &config()).await.is_err());
    }

    #[tokio::test]
    async fn static_provider_serves_every_call() {
        let provider = StaticLlmProvider::new("{\"type\":\"CODE\"}");
        let messages = vec![Message {
            role: MessageRole::User,
            content: "line".to_string(),
        }];
        for _ in 0..5 {
            let response = provider.generate_chat(&messages, &config()).await.unwrap();
            assert_eq!(response.content, "{\"type\":\"CODE\"}");
        }
        assert_eq!(provider.call_count(), 5);
    }
}
