use crate::stage1_ingest::LineIngestor;
use crate::stage2_structure::StructureIdentifier;
use crate::stage3_entities::EntityExtractor;
use crate::stage4_flow::FlowExtractor;
use chrono::Utc;
use cobolgraph_core::{GraphArtifact, PipelineConfig, PipelineError, Result, SourceBlob, SourceFetcher};
use cobolgraph_llm::LLMProvider;
use cobolgraph_store::GraphWriter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// A human-readable progress update emitted as each stage completes, drained
/// by the CLI and printed to the informational stream.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: &'static str,
    pub message: String,
}

impl ProgressEvent {
    fn new(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

pub const JSON_START_SENTINEL: &str = "JSON_START";
pub const JSON_END_SENTINEL: &str = "JSON_END";

/// Drives the five stages in order, applying the shared concurrency and
/// retry configuration to each, streaming progress as it goes, and
/// assembling the writer-ready artifact. Never commits a partial writer
/// transaction: on cancellation, the writer is not invoked at all.
pub struct Orchestrator {
    fetcher: Arc<dyn SourceFetcher>,
    provider: Arc<dyn LLMProvider>,
    writer: Arc<dyn GraphWriter>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        provider: Arc<dyn LLMProvider>,
        writer: Arc<dyn GraphWriter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            provider,
            writer,
            config,
        }
    }

    #[instrument(skip(self, cancel), fields(location))]
    pub async fn run(
        &self,
        location: &str,
        cancel: CancellationToken,
    ) -> Result<(GraphArtifact, mpsc::UnboundedReceiver<ProgressEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let artifact = self.run_with_progress(location, &cancel, &tx).await?;
        Ok((artifact, rx))
    }

    async fn run_with_progress(
        &self,
        location: &str,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<GraphArtifact> {
        let blob: SourceBlob = self.fetcher.fetch(location).await?;

        if cancel.is_cancelled() {
            return Err(PipelineError::StageFailed("cancelled before stage 1".to_string()));
        }

        let ingestor = LineIngestor::new(
            self.provider.clone(),
            self.config.retry.clone(),
            self.config.concurrency.classification,
        );
        let (program, source_lines) = ingestor.ingest(&blob).await?;
        let _ = tx.send(ProgressEvent::new(
            "ingest",
            format!("classified {} lines for {}", source_lines.len(), program.program_id),
        ));
        info!(program_id = %program.program_id, total_lines = program.total_lines, "stage 1 complete");

        if cancel.is_cancelled() {
            return Err(PipelineError::StageFailed("cancelled before stage 2".to_string()));
        }

        let identifier = StructureIdentifier::new(self.provider.clone(), self.config.retry.clone());
        let (structures, line_map) = identifier.identify(&program, &source_lines).await?;
        let source_lines = apply_structure_map(source_lines, &line_map);
        let _ = tx.send(ProgressEvent::new(
            "structure",
            format!("identified {} structures", structures.len()),
        ));
        info!(structures = structures.len(), "stage 2 complete");

        if cancel.is_cancelled() {
            return Err(PipelineError::StageFailed("cancelled before stage 3".to_string()));
        }

        let extractor = EntityExtractor::new(
            self.provider.clone(),
            self.config.retry.clone(),
            self.config.concurrency.extraction,
        );
        let entities = extractor.extract(&program, &structures, &source_lines).await?;
        let _ = tx.send(ProgressEvent::new(
            "entities",
            format!("reconciled {} entities", entities.len()),
        ));
        info!(entities = entities.len(), "stage 3 complete");

        if cancel.is_cancelled() {
            return Err(PipelineError::StageFailed("cancelled before stage 4".to_string()));
        }

        let flow_extractor = FlowExtractor::new(
            self.provider.clone(),
            self.config.retry.clone(),
            self.config.concurrency.flow,
        );
        let (control_flow, line_references) = flow_extractor
            .extract(&program, &structures, &source_lines, &entities)
            .await?;
        let _ = tx.send(ProgressEvent::new(
            "flow",
            format!(
                "resolved {} control-flow edges and {} line references",
                control_flow.len(),
                line_references.len()
            ),
        ));
        info!(
            control_flow = control_flow.len(),
            line_references = line_references.len(),
            "stage 4 complete"
        );

        let artifact = GraphArtifact {
            program,
            source_lines,
            structures,
            entities,
            control_flow,
            line_references,
            committed_at: Utc::now(),
        };

        if cancel.is_cancelled() {
            return Err(PipelineError::StageFailed(
                "cancelled before writer commit, transaction never opened".to_string(),
            ));
        }

        self.writer.write(&artifact).await?;
        let _ = tx.send(ProgressEvent::new("writer", "committed graph artifact"));
        info!(program_id = %artifact.program.program_id, "stage 5 complete");

        Ok(artifact)
    }
}

fn apply_structure_map(
    mut lines: Vec<cobolgraph_core::SourceLine>,
    line_map: &std::collections::HashMap<u32, String>,
) -> Vec<cobolgraph_core::SourceLine> {
    for line in &mut lines {
        line.structure_id = line_map.get(&line.line_number).cloned();
    }
    lines
}

/// Serializes the final artifact as the sentinel-framed payload the CLI
/// writes to stdout, matching the original streaming convention.
pub fn render_sentinel_payload(artifact: &GraphArtifact) -> Result<String> {
    let json = serde_json::to_string_pretty(artifact)?;
    Ok(format!("{JSON_START_SENTINEL}\n{json}\n{JSON_END_SENTINEL}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobolgraph_core::{InlineFetcher, RetryConfig};
    use cobolgraph_llm::testing::StaticLlmProvider;
    use cobolgraph_store::InMemoryGraphStore;

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.retry = RetryConfig {
            max_attempts: 1,
            initial_backoff_secs: 0,
        };
        config.concurrency.classification = 4;
        config.concurrency.extraction = 4;
        config.concurrency.flow = 4;
        config
    }

    #[tokio::test]
    async fn single_program_id_line_writer_commits_program_only() {
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(InlineFetcher);
        let provider: Arc<dyn LLMProvider> = Arc::new(StaticLlmProvider::new(
            "{\"program_id\":\"FOO\",\"type\":\"CODE\",\"structures\":[],\"found_entities\":[],\"control_flow\":[],\"line_references\":[]}",
        ));
        let store = Arc::new(InMemoryGraphStore::new());
        let writer: Arc<dyn GraphWriter> = store.clone();
        let orchestrator = Orchestrator::new(fetcher, provider, writer, fast_config());

        let (artifact, _rx) = orchestrator
            .run("       PROGRAM-ID. FOO.", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.program.program_id, "FOO");
        assert_eq!(artifact.structures.len(), 0);
        assert_eq!(artifact.entities.len(), 0);
        assert_eq!(store.programs.len(), 1);
        assert_eq!(store.source_lines.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_before_writer_never_commits() {
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(InlineFetcher);
        let provider: Arc<dyn LLMProvider> = Arc::new(StaticLlmProvider::new(
            "{\"program_id\":\"FOO\",\"type\":\"CODE\",\"structures\":[],\"found_entities\":[],\"control_flow\":[],\"line_references\":[]}",
        ));
        let store = Arc::new(InMemoryGraphStore::new());
        let writer: Arc<dyn GraphWriter> = store.clone();
        let orchestrator = Orchestrator::new(fetcher, provider, writer, fast_config());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = orchestrator.run("       PROGRAM-ID. FOO.", cancel).await;

        assert!(result.is_err());
        assert_eq!(store.programs.len(), 0);
    }

    #[test]
    fn sentinel_payload_is_framed_correctly() {
        let artifact = GraphArtifact {
            program: cobolgraph_core::Program {
                program_id: "FOO".to_string(),
                program_name: "FOO".to_string(),
                file_name: "foo.cbl".to_string(),
                total_lines: 1,
            },
            source_lines: vec![],
            structures: vec![],
            entities: vec![],
            control_flow: vec![],
            line_references: vec![],
            committed_at: Utc::now(),
        };
        let payload = render_sentinel_payload(&artifact).unwrap();
        assert!(payload.starts_with("JSON_START\n"));
        assert!(payload.trim_end().ends_with("JSON_END"));
    }
}
