use thiserror::Error;

/// The closed error taxonomy for the cobolgraph pipeline.
///
/// Callers match on these variants rather than inspecting error strings.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input malformed: {0}")]
    InputMalformed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("referential miss: {0}")]
    ReferentialMiss(String),

    #[error("writer conflict: {0}")]
    WriterConflict(String),

    #[error("stage failed: {0}")]
    StageFailed(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Whether the orchestrator's retry executor should retry a failure of
    /// this kind. Rate limiting and transient upstream failures retry;
    /// everything else is terminal for the call that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::UpstreamUnavailable(_) | PipelineError::UpstreamRateLimited(_)
        )
    }
}
