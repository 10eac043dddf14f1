pub mod anthropic;
pub mod openai_compatible;
pub mod provider;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
pub use provider::{
    generate_structured, is_rate_limited, GenerationConfig, JsonSchemaSpec, LLMProvider,
    LLMResponse, LLMResult, Message, MessageRole, ProviderCharacteristics, RateLimited,
};
