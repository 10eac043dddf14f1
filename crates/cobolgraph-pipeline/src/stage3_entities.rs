use crate::retry::{retry_with_backoff, upstream_error};
use cobolgraph_core::{Entity, EntityType, Program, Result, SourceLine, Structure};
use cobolgraph_llm::{generate_structured, GenerationConfig, JsonSchemaSpec, LLMProvider};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
struct FoundEntity {
    entity_name: String,
    entity_type: EntityType,
    definition_line_id: Option<String>,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    found_entities: Vec<FoundEntity>,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    entity_name: String,
    entity_type: EntityType,
    definition_line_id: Option<String>,
    description: String,
}

/// Enumerates every data entity the program defines or references, then
/// reconciles duplicate mentions across structures into one record per
/// normalized name.
pub struct EntityExtractor {
    provider: Arc<dyn LLMProvider>,
    retry: cobolgraph_core::RetryConfig,
    concurrency: usize,
}

impl EntityExtractor {
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
    ) -> Result<Vec<Entity>> {
        let found = self.extract_phase_a(program, structures, lines).await;
        let reconciled = self.reconcile_phase_b(program, found).await;
        Ok(reconciled)
    }

    /// Phase A: one worker call per structure, fanned out under a semaphore.
    async fn extract_phase_a(
        &self,
        program: &Program,
        structures: &[Structure],
        lines: &[SourceLine],
    ) -> Vec<FoundEntity> {
        let full_text = lines
            .iter()
            .map(|l| format!("{}: {}", l.line_number, l.content))
            .collect::<Vec<_>>()
            .join("\n");
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let provider = self.provider.clone();
        let retry = self.retry.clone();
        let program_id = program.program_id.clone();

        let mut tasks = stream::iter(structures.iter().cloned().map(|structure| {
            let semaphore = semaphore.clone();
            let provider = provider.clone();
            let retry = retry.clone();
            let full_text = full_text.clone();
            let program_id = program_id.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                extract_structure_entities(provider.as_ref(), &retry, &program_id, &structure, &full_text)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(structure_id = %structure.structure_id, error = %e, "entity extraction failed for structure");
                        Vec::new()
                    })
            }
        }))
        .buffer_unordered(self.concurrency.max(1));

        let mut all = Vec::new();
        while let Some(found) = tasks.next().await {
            all.extend(found);
        }
        all
    }

    /// Phase B: group by normalized name, then resolve each multi-candidate
    /// group independently and concurrently.
    async fn reconcile_phase_b(&self, program: &Program, found: Vec<FoundEntity>) -> Vec<Entity> {
        let mut groups: HashMap<String, Vec<FoundEntity>> = HashMap::new();
        let mut first_casing: HashMap<String, String> = HashMap::new();
        for entity in found {
            let key = entity.entity_name.trim().to_uppercase();
            first_casing
                .entry(key.clone())
                .or_insert_with(|| entity.entity_name.clone());
            groups.entry(key).or_default().push(entity);
        }

        let provider = self.provider.clone();
        let retry = self.retry.clone();
        let program_id = program.program_id.clone();

        let mut tasks = stream::iter(groups.into_iter().map(|(key, candidates)| {
            let provider = provider.clone();
            let retry = retry.clone();
            let program_id = program_id.clone();
            let name = first_casing.get(&key).cloned().unwrap_or(key);
            async move {
                if candidates.len() == 1 {
                    let candidate = candidates.into_iter().next().unwrap();
                    return to_entity(&program_id, &name, &candidate);
                }
                resolve_group(provider.as_ref(), &retry, &program_id, &name, &candidates).await
            }
        }))
        .buffer_unordered(self.concurrency.max(1));

        let mut entities = Vec::new();
        while let Some(entity) = tasks.next().await {
            entities.push(entity);
        }
        entities
    }
}

async fn extract_structure_entities(
    provider: &dyn LLMProvider,
    retry: &cobolgraph_core::RetryConfig,
    program_id: &str,
    structure: &Structure,
    full_text: &str,
) -> Result<Vec<FoundEntity>> {
    retry_with_backoff("stage3.extract", retry, || async move {
        let schema = JsonSchemaSpec {
            name: "found_entities".to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "found_entities": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "entity_name": {"type": "string"},
                                "entity_type": {"type": "string", "enum": ["FILE", "VARIABLE", "COPYBOOK"]},
                                "definition_line_id": {"type": ["string", "null"]},
                                "description": {"type": "string"},
                            },
                            "required": ["entity_name", "entity_type", "description"],
                        },
                    },
                },
                "required": ["found_entities"],
            }),
        };
        let config = GenerationConfig::extraction(schema);
        let prompt = format!(
            "List data entities (files, variables, copybooks) referenced in lines {}-{} of program {program_id}.\nFull program:\n{full_text}",
            structure.start_line_number, structure.end_line_number
        );
        let response: ExtractionResponse = generate_structured(provider, prompt, config)
            .await
            .map_err(upstream_error)?;
        Ok(response.found_entities)
    })
    .await
}

/// Resolves a multi-candidate group via a second call. On a resolution
/// failure, the first candidate is kept and the conflict is logged, per the
/// "keep-first for a failed reconciliation" propagation policy.
async fn resolve_group(
    provider: &dyn LLMProvider,
    retry: &cobolgraph_core::RetryConfig,
    program_id: &str,
    name: &str,
    candidates: &[FoundEntity],
) -> Entity {
    let result = retry_with_backoff("stage3.resolve", retry, || async move {
        let schema = JsonSchemaSpec {
            name: "resolved_entity".to_string(),
            schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "entity_name": {"type": "string"},
                    "entity_type": {"type": "string", "enum": ["FILE", "VARIABLE", "COPYBOOK"]},
                    "definition_line_id": {"type": ["string", "null"]},
                    "description": {"type": "string"},
                },
                "required": ["entity_name", "entity_type", "description"],
            }),
        };
        let config = GenerationConfig::extraction(schema);
        let candidate_list = candidates
            .iter()
            .map(|c| format!("- type={:?} def={:?} desc={}", c.entity_type, c.definition_line_id, c.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "mode=resolve. Merge these conflicting mentions of entity '{name}' preserving every distinct attribute. A declaration site (SELECT/FD) dominates a use site; on ties the lower line number wins.\n{candidate_list}"
        );
        let response: ResolveResponse = generate_structured(provider, prompt, config)
            .await
            .map_err(upstream_error)?;
        Ok(response)
    })
    .await;

    match result {
        Ok(resolved) => Entity {
            entity_id: Entity::entity_id_for(program_id, name),
            program_id: program_id.to_string(),
            name: name.to_string(),
            entity_type: resolved.entity_type,
            definition_line_id: resolved.definition_line_id,
            description: resolved.description,
        },
        Err(e) => {
            warn!(name, error = %e, "entity reconciliation failed, keeping first candidate");
            to_entity(program_id, name, &candidates[0])
        }
    }
}

fn to_entity(program_id: &str, name: &str, candidate: &FoundEntity) -> Entity {
    Entity {
        entity_id: Entity::entity_id_for(program_id, name),
        program_id: program_id.to_string(),
        name: name.to_string(),
        entity_type: candidate.entity_type,
        definition_line_id: candidate.definition_line_id.clone(),
        description: candidate.description.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Program {
        Program {
            program_id: "FOO".to_string(),
            program_name: "FOO".to_string(),
            file_name: "foo.cbl".to_string(),
            total_lines: 100,
        }
    }

    #[tokio::test]
    async fn single_candidate_group_passes_through_unchanged() {
        use cobolgraph_llm::testing::FakeLlmProvider;
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![Ok(
            "{\"found_entities\":[{\"entity_name\":\"CUST-FILE\",\"entity_type\":\"FILE\",\"definition_line_id\":null,\"description\":\"customer file\"}]}".to_string(),
        )]));
        let extractor = EntityExtractor::new(
            provider,
            cobolgraph_core::RetryConfig {
                max_attempts: 1,
                initial_backoff_secs: 0,
            },
            4,
        );
        let structures = vec![Structure {
            structure_id: "sec_FOO_MAIN".to_string(),
            program_id: "FOO".to_string(),
            name: "MAIN".to_string(),
            structure_type: cobolgraph_core::StructureType::Paragraph,
            start_line_number: 1,
            end_line_number: 10,
            parent_structure_id: None,
        }];
        let lines = vec![];
        let entities = extractor.extract(&program(), &structures, &lines).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "CUST-FILE");
        assert_eq!(entities[0].entity_id, "FOO_CUST-FILE");
    }

    #[tokio::test]
    async fn declarative_site_wins_over_use_site_on_reconciliation() {
        use cobolgraph_llm::testing::FakeLlmProvider;
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![
            Ok("{\"found_entities\":[{\"entity_name\":\"CUST-REC\",\"entity_type\":\"VARIABLE\",\"definition_line_id\":null,\"description\":\"used in para A\"}]}".to_string()),
            Ok("{\"found_entities\":[{\"entity_name\":\"CUST-REC\",\"entity_type\":\"VARIABLE\",\"definition_line_id\":\"FOO_50\",\"description\":\"declared record\"}]}".to_string()),
            Ok("{\"entity_name\":\"CUST-REC\",\"entity_type\":\"VARIABLE\",\"definition_line_id\":\"FOO_50\",\"description\":\"customer record, declared and used\"}".to_string()),
        ]));
        let extractor = EntityExtractor::new(
            provider,
            cobolgraph_core::RetryConfig {
                max_attempts: 1,
                initial_backoff_secs: 0,
            },
            4,
        );
        let structures = vec![
            Structure {
                structure_id: "sec_FOO_PARA_A".to_string(),
                program_id: "FOO".to_string(),
                name: "PARA-A".to_string(),
                structure_type: cobolgraph_core::StructureType::Paragraph,
                start_line_number: 1,
                end_line_number: 10,
                parent_structure_id: None,
            },
            Structure {
                structure_id: "sec_FOO_PARA_B".to_string(),
                program_id: "FOO".to_string(),
                name: "PARA-B".to_string(),
                structure_type: cobolgraph_core::StructureType::Paragraph,
                start_line_number: 40,
                end_line_number: 60,
                parent_structure_id: None,
            },
        ];
        let lines = vec![];
        let entities = extractor.extract(&program(), &structures, &lines).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].definition_line_id, Some("FOO_50".to_string()));
    }

    #[tokio::test]
    async fn reconciliation_failure_keeps_first_candidate() {
        use cobolgraph_llm::testing::FakeLlmProvider;
        let provider: Arc<dyn LLMProvider> = Arc::new(FakeLlmProvider::new(vec![
            Ok("{\"found_entities\":[{\"entity_name\":\"X\",\"entity_type\":\"VARIABLE\",\"definition_line_id\":null,\"description\":\"first\"}]}".to_string()),
            Ok("{\"found_entities\":[{\"entity_name\":\"X\",\"entity_type\":\"VARIABLE\",\"definition_line_id\":null,\"description\":\"second\"}]}".to_string()),
            Err("resolve failed".to_string()),
        ]));
        let extractor = EntityExtractor::new(
            provider,
            cobolgraph_core::RetryConfig {
                max_attempts: 1,
                initial_backoff_secs: 0,
            },
            4,
        );
        let structures = vec![
            Structure {
                structure_id: "sec_FOO_A".to_string(),
                program_id: "FOO".to_string(),
                name: "A".to_string(),
                structure_type: cobolgraph_core::StructureType::Paragraph,
                start_line_number: 1,
                end_line_number: 10,
                parent_structure_id: None,
            },
            Structure {
                structure_id: "sec_FOO_B".to_string(),
                program_id: "FOO".to_string(),
                name: "B".to_string(),
                structure_type: cobolgraph_core::StructureType::Paragraph,
                start_line_number: 20,
                end_line_number: 30,
                parent_structure_id: None,
            },
        ];
        let lines = vec![];
        let entities = extractor.extract(&program(), &structures, &lines).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].description, "first");
    }
}
