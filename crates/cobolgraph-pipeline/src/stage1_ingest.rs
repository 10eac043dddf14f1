use crate::retry::{retry_with_backoff, upstream_error};
use cobolgraph_core::{
    filename_stem_upper, LineType, PipelineError, Program, Result, SourceBlob, SourceLine,
};
use cobolgraph_llm::{generate_structured, GenerationConfig, JsonSchemaSpec, LLMProvider};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

const CONTEXT_WINDOW: u32 = 25;

#[derive(Debug, Deserialize)]
struct ProgramIdResponse {
    program_id: String,
}

#[derive(Debug, Deserialize)]
struct LineTypeResponse {
    #[serde(rename = "type")]
    line_type: LineType,
}

/// Splits a raw blob into dense, 1-based `SourceLine`s, classifying each
/// line under bounded concurrency and extracting the program identifier via
/// a single constrained call with a filename-stem fallback.
pub struct LineIngestor {
    provider: Arc<dyn LLMProvider>,
    retry: cobolgraph_core::RetryConfig,
    concurrency: usize,
}

impl LineIngestor {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        retry: cobolgraph_core::RetryConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            retry,
            concurrency,
        }
    }

    pub async fn ingest(&self, blob: &SourceBlob) -> Result<(Program, Vec<SourceLine>)> {
        let lines: Vec<&str> = if blob.content.is_empty() {
            Vec::new()
        } else {
            blob.content.lines().collect()
        };
        let total_lines = lines.len() as u32;

        let program_id = self.extract_program_id(&blob.content, &blob.file_name).await;

        let classified = self.classify_lines(&program_id, &lines).await;

        let program = Program {
            program_id: program_id.clone(),
            program_name: program_id,
            file_name: blob.file_name.clone(),
            total_lines,
        };

        Ok((program, classified))
    }

    async fn extract_program_id(&self, content: &str, file_name: &str) -> String {
        let fallback = filename_stem_upper(file_name);
        if content.trim().is_empty() {
            return fallback;
        }

        let provider = self.provider.clone();
        let content = content.to_string();
        let result = retry_with_backoff("stage1.program_id", &self.retry, || {
            let provider = provider.clone();
            let content = content.clone();
            async move {
                let schema = JsonSchemaSpec {
                    name: "program_id".to_string(),
                    schema: serde_json::json!({
                        "type": "object",
                        "properties": {"program_id": {"type": "string"}},
                        "required": ["program_id"],
                    }),
                };
                let config = GenerationConfig::classification(schema);
                let prompt = format!(
                    "Extract the PROGRAM-ID from this COBOL source. Respond as JSON.\n\n{content}"
                );
                generate_structured::<ProgramIdResponse>(provider.as_ref(), prompt, config)
                    .await
                    .map_err(upstream_error)
            }
        })
        .await;

        match result {
            Ok(response) => response.program_id.trim().to_uppercase(),
            Err(e) => {
                warn!(error = %e, fallback, "program id extraction failed, falling back to filename stem");
                fallback
            }
        }
    }

    async fn classify_lines(&self, program_id: &str, lines: &[&str]) -> Vec<SourceLine> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let provider = self.provider.clone();
        let retry = self.retry.clone();

        let mut stream = stream::iter(lines.iter().enumerate().map(|(idx, line)| {
            let line_number = (idx + 1) as u32;
            let content = line.to_string();
            let window = sliding_window(lines, idx);
            let semaphore = semaphore.clone();
            let provider = provider.clone();
            let retry = retry.clone();
            let program_id = program_id.to_string();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let line_type = classify_one_line(provider.as_ref(), &retry, &content, &window)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(line_number, error = %e, "line classification failed, defaulting to CODE");
                        LineType::Code
                    });
                SourceLine {
                    line_id: SourceLine::line_id_for(&program_id, line_number),
                    program_id,
                    line_number,
                    content,
                    line_type,
                    structure_id: None,
                }
            }
        }))
        .buffer_unordered(self.concurrency.max(1));

        let mut results = Vec::with_capacity(lines.len());
        while let Some(line) = stream.next().await {
            results.push(line);
        }
        results.sort_by_key(|l: &SourceLine| l.line_number);
        info!(count = results.len(), "classified source lines");
        results
    }
}

fn sliding_window(lines: &[&str], idx: usize) -> String {
    let start = idx.saturating_sub(CONTEXT_WINDOW as usize);
    let end = (idx + CONTEXT_WINDOW as usize + 1).min(lines.len());
    lines[start..end].join("\n")
}

async fn classify_one_line(
    provider: &dyn LLMProvider,
    retry: &cobolgraph_core::RetryConfig,
    content: &str,
    window: &str,
) -> Result<LineType> {
    retry_with_backoff("stage1.classify_line", retry, || async move {
        let schema = JsonSchemaSpec {
            name: "line_type".to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "type": {"type": "string", "enum": ["CODE", "COMMENT", "BLANK", "DIRECTIVE"]},
                },
                "required": ["type"],
            }),
        };
        let config = GenerationConfig::classification(schema);
        let prompt = format!(
            "Classify this COBOL line as CODE, COMMENT, BLANK, or DIRECTIVE.\nLine: {content}\nContext:\n{window}"
        );
        let response = generate_structured::<LineTypeResponse>(provider, prompt, config)
            .await
            .map_err(|e| PipelineError::SchemaViolation(e.to_string()))?;
        Ok(response.line_type)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobolgraph_llm::testing::{FakeLlmProvider, StaticLlmProvider};

    fn retry_config() -> cobolgraph_core::RetryConfig {
        cobolgraph_core::RetryConfig {
            max_attempts: 1,
            initial_backoff_secs: 0,
        }
    }

    #[tokio::test]
    async fn single_line_program_id_and_one_code_line() {
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![
            Ok("{\"program_id\":\"FOO\"}".to_string()),
            Ok("{\"type\":\"CODE\"}".to_string()),
        ]));
        let ingestor = LineIngestor::new(provider, retry_config(), 4);
        let blob = SourceBlob {
            file_name: "foo.cbl".to_string(),
            content: "       PROGRAM-ID. FOO.".to_string(),
        };
        let (program, lines) = ingestor.ingest(&blob).await.unwrap();
        assert_eq!(program.program_id, "FOO");
        assert_eq!(program.total_lines, 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].line_type, LineType::Code);
        assert_eq!(lines[0].line_id, "FOO_1");
    }

    #[tokio::test]
    async fn zero_line_source_produces_empty_artifact() {
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![]));
        let ingestor = LineIngestor::new(provider, retry_config(), 4);
        let blob = SourceBlob {
            file_name: "empty.cbl".to_string(),
            content: String::new(),
        };
        let (program, lines) = ingestor.ingest(&blob).await.unwrap();
        assert_eq!(program.total_lines, 0);
        assert_eq!(program.program_id, "EMPTY");
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn program_id_extraction_failure_falls_back_to_filename_stem() {
        let provider: Arc<dyn LLMProvider> =
            Arc::new(StaticLlmProvider::new("not valid json"));
        let ingestor = LineIngestor::new(provider, retry_config(), 4);
        let blob = SourceBlob {
            file_name: "my-prog.cbl".to_string(),
            content: "       PROGRAM-ID. ANYTHING.".to_string(),
        };
        let (program, _lines) = ingestor.ingest(&blob).await.unwrap();
        assert_eq!(program.program_id, "MY-PROG");
    }

    #[tokio::test]
    async fn line_classification_failure_defaults_to_code() {
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![
            Ok("{\"program_id\":\"FOO\"}".to_string()),
            Err("schema violation".to_string()),
        ]));
        let ingestor = LineIngestor::new(provider, retry_config(), 4);
        let blob = SourceBlob {
            file_name: "foo.cbl".to_string(),
            content: "       PROGRAM-ID. FOO.".to_string(),
        };
        let (_program, lines) = ingestor.ingest(&blob).await.unwrap();
        assert_eq!(lines[0].line_type, LineType::Code);
    }

    #[tokio::test]
    async fn all_line_numbers_present_exactly_once() {
        let provider: Arc<dyn LLMProvider> = Arc::new(StaticLlmProvider::new(
            "{\"program_id\":\"FOO\",\"type\":\"CODE\"}",
        ));
        let ingestor = LineIngestor::new(provider, retry_config(), 4);
        let content = (1..=10).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let blob = SourceBlob {
            file_name: "ten.cbl".to_string(),
            content,
        };
        let (program, lines) = ingestor.ingest(&blob).await.unwrap();
        assert_eq!(program.total_lines, 10);
        let mut numbers: Vec<u32> = lines.iter().map(|l| l.line_number).collect();
        numbers.sort();
        assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
    }
}
