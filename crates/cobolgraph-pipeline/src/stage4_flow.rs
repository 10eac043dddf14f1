use crate::retry::{retry_with_backoff, upstream_error};
use cobolgraph_core::{
    ControlFlow, Entity, FlowType, LineReference, Program, Result, SourceLine, Structure,
    UsageType,
};
use cobolgraph_llm::{generate_structured, GenerationConfig, JsonSchemaSpec, LLMProvider};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct ControlFlowCandidate {
    line_number: u32,
    target_structure_name: String,
    #[serde(rename = "type")]
    flow_type: FlowType,
}

#[derive(Debug, Deserialize)]
struct LineReferenceCandidate {
    line_number: u32,
    target_entity_name: String,
    usage_type: UsageType,
}

#[derive(Debug, Deserialize)]
struct FlowResponse {
    control_flow: Vec<ControlFlowCandidate>,
    line_references: Vec<LineReferenceCandidate>,
}

/// For every leaf structure, extracts control-flow edges and data-reference
/// edges from its lines. Name→id resolution and referential-miss dropping
/// happen here, at the orchestrator boundary, so unresolved edges never
/// reach the writer.
pub struct FlowExtractor {
    provider: Arc<dyn LLMProvider>,
    retry: cobolgraph_core::RetryConfig,
    concurrency: usize,
}

impl FlowExtractor {
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

    pub async fn extract(
        &self,
        program: &Program,
        structures: &[Structure],
        lines: &[SourceLine],
        entities: &[Entity],
    ) -> Result<(Vec<ControlFlow>, Vec<LineReference>)> {
        let targets = leaf_structures(structures, lines);
        let structure_by_id: HashMap<&str, &Structure> =
            structures.iter().map(|s| (s.structure_id.as_str(), s)).collect();
        let structure_name_to_id: HashMap<String, String> = structures
            .iter()
            .map(|s| (s.name.trim().to_uppercase(), s.structure_id.clone()))
            .collect();
        let entity_name_to_id: HashMap<String, String> = entities
            .iter()
            .map(|e| (e.name.trim().to_uppercase(), e.entity_id.clone()))
            .collect();
        let line_by_number: HashMap<u32, &SourceLine> =
            lines.iter().map(|l| (l.line_number, l)).collect();

        let full_text = lines
            .iter()
            .map(|l| format!("{}: {}", l.line_number, l.content))
            .collect::<Vec<_>>()
            .join("\n");
        let known_entities: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let known_paragraphs: Vec<String> = structures.iter().map(|s| s.name.clone()).collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let provider = self.provider.clone();
        let retry = self.retry.clone();

        let mut tasks = stream::iter(targets.into_iter().map(|structure_id| {
            let structure = structure_by_id.get(structure_id.as_str()).copied();
            let semaphore = semaphore.clone();
            let provider = provider.clone();
            let retry = retry.clone();
            let full_text = full_text.clone();
            let known_entities = known_entities.clone();
            let known_paragraphs = known_paragraphs.clone();
            let target_lines: Vec<&SourceLine> = lines
                .iter()
                .filter(|l| l.structure_id.as_deref() == Some(structure_id.as_str()))
                .collect();
            async move {
                let Some(structure) = structure else {
                    return FlowResponse {
                        control_flow: Vec::new(),
                        line_references: Vec::new(),
                    };
                };
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                extract_structure_flow(
                    provider.as_ref(),
                    &retry,
                    structure,
                    &target_lines,
                    &full_text,
                    &known_entities,
                    &known_paragraphs,
                )
                .await
                .unwrap_or_else(|e| {
                    warn!(structure_id = %structure.structure_id, error = %e, "flow extraction failed for structure");
                    FlowResponse {
                        control_flow: Vec::new(),
                        line_references: Vec::new(),
                    }
                })
            }
        }))
        .buffer_unordered(self.concurrency.max(1));

        let mut control_flow = Vec::new();
        let mut line_references = Vec::new();

        while let Some(response) = tasks.next().await {
            for candidate in response.control_flow {
                let Some(line) = line_by_number.get(&candidate.line_number) else {
                    warn!(line_number = candidate.line_number, "control flow edge names an unknown line, dropping");
                    continue;
                };
                let key = candidate.target_structure_name.trim().to_uppercase();
                match structure_name_to_id.get(&key) {
                    Some(target_structure_id) => control_flow.push(ControlFlow {
                        flow_id: ControlFlow::flow_id_for(&line.line_id),
                        source_line_id: line.line_id.clone(),
                        target_structure_id: target_structure_id.clone(),
                        flow_type: candidate.flow_type,
                    }),
                    None => warn!(
                        target = %candidate.target_structure_name,
                        "control flow edge names an unknown structure, dropping (referential miss)"
                    ),
                }
            }
            for candidate in response.line_references {
                let Some(line) = line_by_number.get(&candidate.line_number) else {
                    warn!(line_number = candidate.line_number, "line reference names an unknown line, dropping");
                    continue;
                };
                let key = candidate.target_entity_name.trim().to_uppercase();
                match entity_name_to_id.get(&key) {
                    Some(target_entity_id) => line_references.push(LineReference {
                        reference_id: LineReference::reference_id_for(
                            &line.line_id,
                            &candidate.target_entity_name,
                        ),
                        source_line_id: line.line_id.clone(),
                        target_entity_id: target_entity_id.clone(),
                        usage_type: candidate.usage_type,
                    }),
                    None => warn!(
                        target = %candidate.target_entity_name,
                        "line reference names an unknown entity, dropping (referential miss)"
                    ),
                }
            }
        }

        control_flow.sort_by(|a, b| a.source_line_id.cmp(&b.source_line_id));
        line_references.sort_by(|a, b| a.source_line_id.cmp(&b.source_line_id));
        Ok((control_flow, line_references))
    }
}

/// Target structures are those whose id appears as any line's
/// `structure_id` — leaf-only, avoiding duplicate extraction across
/// ancestor structures whose intervals fully contain a leaf's.
fn leaf_structures(structures: &[Structure], lines: &[SourceLine]) -> Vec<String> {
    let active: HashSet<&str> = lines
        .iter()
        .filter_map(|l| l.structure_id.as_deref())
        .collect();
    structures
        .iter()
        .map(|s| s.structure_id.clone())
        .filter(|id| active.contains(id.as_str()))
        .collect()
}

async fn extract_structure_flow(
    provider: &dyn LLMProvider,
    retry: &cobolgraph_core::RetryConfig,
    structure: &Structure,
    target_lines: &[&SourceLine],
    full_text: &str,
    known_entities: &[String],
    known_paragraphs: &[String],
) -> Result<FlowResponse> {
    retry_with_backoff("stage4.extract_flow", retry, || async move {
        let schema = JsonSchemaSpec {
            name: "flow_and_references".to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "control_flow": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "line_number": {"type": "integer"},
                                "target_structure_name": {"type": "string"},
                                "type": {"type": "string", "enum": ["PERFORM", "GO_TO", "CALL"]},
                            },
                            "required": ["line_number", "target_structure_name", "type"],
                        },
                    },
                    "line_references": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "line_number": {"type": "integer"},
                                "target_entity_name": {"type": "string"},
                                "usage_type": {
                                    "type": "string",
                                    "enum": ["READS", "WRITES", "UPDATES", "VALIDATES", "OPENS", "CLOSES", "DECLARATION"],
                                },
                            },
                            "required": ["line_number", "target_entity_name", "usage_type"],
                        },
                    },
                },
                "required": ["control_flow", "line_references"],
            }),
        };
        let config = GenerationConfig::extraction(schema);
        let target_code = target_lines
            .iter()
            .map(|l| format!("{}: {}", l.line_number, l.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Analyze control flow and data references in structure {} ({}-{}).\n\
             Known paragraphs: {}\n\
             Known entities: {}\n\
             File-I/O rules: OPEN->OPENS, CLOSE->CLOSES, READ INTO -> file READS + target UPDATES, WRITE->WRITES, REWRITE->UPDATES.\n\
             Target lines:\n{target_code}\n\
             Full program:\n{full_text}",
            structure.name,
            structure.start_line_number,
            structure.end_line_number,
            known_paragraphs.join(", "),
            known_entities.join(", "),
        );
        generate_structured::<FlowResponse>(provider, prompt, config)
            .await
            .map_err(upstream_error)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cobolgraph_core::{EntityType, LineType, StructureType};
    use cobolgraph_llm::testing::FakeLlmProvider;

    fn program() -> Program {
        Program {
            program_id: "FOO".to_string(),
            program_name: "FOO".to_string(),
            file_name: "foo.cbl".to_string(),
            total_lines: 10,
        }
    }

    fn main_para() -> Structure {
        Structure {
            structure_id: "sec_FOO_MAIN-PARA".to_string(),
            program_id: "FOO".to_string(),
            name: "MAIN-PARA".to_string(),
            structure_type: StructureType::Paragraph,
            start_line_number: 1,
            end_line_number: 5,
            parent_structure_id: None,
        }
    }

    fn thousand_main() -> Structure {
        Structure {
            structure_id: "sec_FOO_1000-MAIN".to_string(),
            program_id: "FOO".to_string(),
            name: "1000-MAIN".to_string(),
            structure_type: StructureType::Paragraph,
            start_line_number: 6,
            end_line_number: 10,
            parent_structure_id: None,
        }
    }

    fn line(number: u32, content: &str, structure_id: &str) -> SourceLine {
        SourceLine {
            line_id: SourceLine::line_id_for("FOO", number),
            program_id: "FOO".to_string(),
            line_number: number,
            content: content.to_string(),
            line_type: LineType::Code,
            structure_id: Some(structure_id.to_string()),
        }
    }

    fn retry_config() -> cobolgraph_core::RetryConfig {
        cobolgraph_core::RetryConfig {
            max_attempts: 1,
            initial_backoff_secs: 0,
        }
    }

    #[tokio::test]
    async fn open_input_produces_opens_not_reads() {
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![Ok(
            "{\"control_flow\":[],\"line_references\":[{\"line_number\":1,\"target_entity_name\":\"CUST-FILE\",\"usage_type\":\"OPENS\"}]}".to_string(),
        )]));
        let extractor = FlowExtractor::new(provider, retry_config(), 4);
        let structures = vec![main_para()];
        let lines = vec![line(1, "OPEN INPUT CUST-FILE", "sec_FOO_MAIN-PARA")];
        let entities = vec![Entity {
            entity_id: "FOO_CUST-FILE".to_string(),
            program_id: "FOO".to_string(),
            name: "CUST-FILE".to_string(),
            entity_type: EntityType::File,
            definition_line_id: None,
            description: "customer file".to_string(),
        }];
        let (flow, refs) = extractor
            .extract(&program(), &structures, &lines, &entities)
            .await
            .unwrap();
        assert!(flow.is_empty());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].usage_type, UsageType::Opens);
        assert_eq!(refs[0].target_entity_id, "FOO_CUST-FILE");
    }

    #[tokio::test]
    async fn perform_known_paragraph_produces_control_flow_edge() {
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![Ok(
            "{\"control_flow\":[{\"line_number\":1,\"target_structure_name\":\"1000-MAIN\",\"type\":\"PERFORM\"}],\"line_references\":[]}".to_string(),
        )]));
        let extractor = FlowExtractor::new(provider, retry_config(), 4);
        let structures = vec![main_para(), thousand_main()];
        let lines = vec![
            line(1, "PERFORM 1000-MAIN", "sec_FOO_MAIN-PARA"),
            line(6, "DISPLAY 'HI'", "sec_FOO_1000-MAIN"),
        ];
        let (flow, _refs) = extractor
            .extract(&program(), &structures, &lines, &[])
            .await
            .unwrap();
        assert_eq!(flow.len(), 1);
        assert_eq!(flow[0].flow_type, FlowType::Perform);
        assert_eq!(flow[0].target_structure_id, "sec_FOO_1000-MAIN");
    }

    #[tokio::test]
    async fn perform_unknown_paragraph_is_dropped() {
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![Ok(
            "{\"control_flow\":[{\"line_number\":1,\"target_structure_name\":\"UNKNOWN-PARA\",\"type\":\"PERFORM\"}],\"line_references\":[]}".to_string(),
        )]));
        let extractor = FlowExtractor::new(provider, retry_config(), 4);
        let structures = vec![main_para()];
        let lines = vec![line(1, "PERFORM UNKNOWN-PARA", "sec_FOO_MAIN-PARA")];
        let (flow, _refs) = extractor
            .extract(&program(), &structures, &lines, &[])
            .await
            .unwrap();
        assert!(flow.is_empty());
    }

    #[test]
    fn leaf_structures_excludes_ancestors_with_no_direct_lines() {
        let mut division = main_para();
        division.structure_id = "sec_FOO_DIVISION".to_string();
        division.structure_type = StructureType::Division;
        division.start_line_number = 1;
        division.end_line_number = 10;

        let structures = vec![division, thousand_main()];
        let lines = vec![line(6, "DISPLAY 'HI'", "sec_FOO_1000-MAIN")];
        let targets = leaf_structures(&structures, &lines);
        assert_eq!(targets, vec!["sec_FOO_1000-MAIN".to_string()]);
    }
}
