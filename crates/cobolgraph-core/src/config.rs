use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::{PipelineError, Result};

/// Per-stage concurrency caps, matching the defaults named in the
/// concurrency and resource model: 20 for classification, 20-50 for entity
/// extraction, 20 for flow/reference analysis.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConcurrencyConfig {
    #[serde(default = "ConcurrencyConfig::default_classification")]
    pub classification: usize,
    #[serde(default = "ConcurrencyConfig::default_extraction")]
    pub extraction: usize,
    #[serde(default = "ConcurrencyConfig::default_flow")]
    pub flow: usize,
}

impl ConcurrencyConfig {
    fn default_classification() -> usize {
        20
    }
    fn default_extraction() -> usize {
        50
    }
    fn default_flow() -> usize {
        20
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            classification: Self::default_classification(),
            extraction: Self::default_extraction(),
            flow: Self::default_flow(),
        }
    }
}

/// Retry/backoff policy shared by every outbound call the orchestrator
/// dispatches, per the retry discipline section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        3
    }
    fn default_initial_backoff_secs() -> u64 {
        1
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_secs: Self::default_initial_backoff_secs(),
        }
    }
}

/// Per-stage worker URLs, used only when stages are deployed as independent
/// services rather than invoked in-process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StageWorkerUrls {
    pub ingest: Option<Url>,
    pub structure: Option<Url>,
    pub entities: Option<Url>,
    pub flow: Option<Url>,
}

/// Process-wide configuration, recognized options per the external
/// interfaces section: LLM/store tenant, graph store target, model name,
/// per-stage worker URLs, per-stage concurrency, global retry count and
/// initial backoff.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_project_id")]
    pub project_id: String,
    #[serde(default = "PipelineConfig::default_instance_id")]
    pub instance_id: String,
    #[serde(default = "PipelineConfig::default_database_id")]
    pub database_id: String,
    #[serde(default = "PipelineConfig::default_model_name")]
    pub model_name: String,
    #[serde(default)]
    pub worker_urls: StageWorkerUrls,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl PipelineConfig {
    fn default_project_id() -> String {
        "cobolgraph".to_string()
    }
    fn default_instance_id() -> String {
        "cobolgraph-instance".to_string()
    }
    fn default_database_id() -> String {
        "cobolgraph-db".to_string()
    }
    fn default_model_name() -> String {
        "claude-sonnet".to_string()
    }

    /// Loads configuration from, in increasing precedence: built-in
    /// defaults, an optional TOML file, and `COBOLGRAPH_`-prefixed
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("project_id", Self::default_project_id())
            .map_err(|e| PipelineError::Configuration(e.to_string()))?
            .set_default("instance_id", Self::default_instance_id())
            .map_err(|e| PipelineError::Configuration(e.to_string()))?
            .set_default("database_id", Self::default_database_id())
            .map_err(|e| PipelineError::Configuration(e.to_string()))?
            .set_default("model_name", Self::default_model_name())
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("COBOLGRAPH").separator("__"));

        let settings = builder
            .build()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| PipelineError::Configuration(e.to_string()))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: Self::default_project_id(),
            instance_id: Self::default_instance_id(),
            database_id: Self::default_database_id(),
            model_name: Self::default_model_name(),
            worker_urls: StageWorkerUrls::default(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.concurrency.classification, 20);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let cfg = PipelineConfig::load(None).unwrap();
        assert_eq!(cfg.project_id, "cobolgraph");
    }
}
