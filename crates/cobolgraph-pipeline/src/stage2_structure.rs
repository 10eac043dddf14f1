use crate::retry::{retry_with_backoff, upstream_error};
use cobolgraph_core::{Program, Result, SourceLine, Structure, StructureType};
use cobolgraph_llm::{generate_structured, GenerationConfig, JsonSchemaSpec, LLMProvider};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct StructureCandidate {
    name: String,
    #[serde(rename = "type")]
    structure_type: StructureType,
    start_line: u32,
}

#[derive(Debug, Deserialize)]
struct StructureResponse {
    structures: Vec<StructureCandidate>,
}

/// Recovers the hierarchical structure from the numbered line catalog. The
/// LLM names structures and their start lines only; end lines, parent
/// links, and the line→structure map are derived deterministically so the
/// structural invariants in the data model always hold regardless of what
/// the model returns.
pub struct StructureIdentifier {
    provider: Arc<dyn LLMProvider>,
    retry: cobolgraph_core::RetryConfig,
}

impl StructureIdentifier {
    pub fn new(provider: Arc<dyn LLMProvider>, retry: cobolgraph_core::RetryConfig) -> Self {
        Self { provider, retry }
    }

    pub async fn identify(
        &self,
        program: &Program,
        lines: &[SourceLine],
    ) -> Result<(Vec<Structure>, HashMap<u32, String>)> {
        let candidates = self.request_structures(program, lines).await?;
        let structures = build_structures(program, &candidates, program.total_lines);
        let line_map = build_line_map(&structures);
        Ok((structures, line_map))
    }

    async fn request_structures(
        &self,
        program: &Program,
        lines: &[SourceLine],
    ) -> Result<Vec<StructureCandidate>> {
        let provider = self.provider.clone();
        let catalog = lines
            .iter()
            .map(|l| format!("{}: [{}] {}", l.line_number, l.line_type, l.content))
            .collect::<Vec<_>>()
            .join("\n");

        retry_with_backoff("stage2.identify_structure", &self.retry, || {
            let provider = provider.clone();
            let catalog = catalog.clone();
            async move {
                let schema = JsonSchemaSpec {
                    name: "structures".to_string(),
                    schema: serde_json::json!({
                        "type": "object",
                        "properties": {
                            "structures": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "name": {"type": "string"},
                                        "type": {"type": "string", "enum": ["DIVISION", "SECTION", "PARAGRAPH"]},
                                        "start_line": {"type": "integer"},
                                    },
                                    "required": ["name", "type", "start_line"],
                                },
                            },
                        },
                        "required": ["structures"],
                    }),
                };
                let config = GenerationConfig::extraction(schema);
                let prompt = format!(
                    "Identify the divisions, sections, and paragraphs in this COBOL line catalog. Do not invent end lines.\n\n{catalog}"
                );
                let response: StructureResponse =
                    generate_structured(provider.as_ref(), prompt, config)
                        .await
                        .map_err(upstream_error)?;
                Ok(response.structures)
            }
        })
        .await
    }
}

/// Steps 2-5 of the algorithm: sort by start line, derive end lines by
/// looking ahead for the next structure of rank ≤ current − 1, derive
/// parent links by looking back for the closest strictly-lower-rank
/// structure, and synthesize ids.
fn build_structures(
    program: &Program,
    candidates: &[StructureCandidate],
    total_lines: u32,
) -> Vec<Structure> {
    let mut sorted: Vec<&StructureCandidate> = candidates
        .iter()
        .filter(|c| {
            let in_bounds = c.start_line >= 1 && c.start_line <= total_lines;
            if !in_bounds {
                warn!(name = %c.name, start_line = c.start_line, "discarding out-of-bounds structure");
            }
            in_bounds
        })
        .collect();
    sorted.sort_by_key(|c| c.start_line);

    let mut structures = Vec::with_capacity(sorted.len());
    for (i, candidate) in sorted.iter().enumerate() {
        let rank = candidate.structure_type.rank();

        let end_line_number = sorted[i + 1..]
            .iter()
            .find(|next| next.structure_type.rank() <= rank.saturating_sub(1))
            .map(|next| next.start_line.saturating_sub(1))
            .unwrap_or(total_lines);

        let parent_structure_id = sorted[..i]
            .iter()
            .rev()
            .find(|prev| prev.structure_type.rank() < rank)
            .map(|prev| Structure::structure_id_for(&program.program_id, &prev.name));

        structures.push(Structure {
            structure_id: Structure::structure_id_for(&program.program_id, &candidate.name),
            program_id: program.program_id.clone(),
            name: candidate.name.clone(),
            structure_type: candidate.structure_type,
            start_line_number: candidate.start_line,
            end_line_number,
            parent_structure_id,
        });
    }
    structures
}

/// Builds the line→structure_id map. Structures are walked in ascending
/// rank (outermost first) so that innermost (highest-rank) entries
/// overwrite outer ones for any line they both cover.
fn build_line_map(structures: &[Structure]) -> HashMap<u32, String> {
    let mut ordered: Vec<&Structure> = structures.iter().collect();
    ordered.sort_by_key(|s| s.structure_type.rank());

    let mut map = HashMap::new();
    for structure in ordered {
        for line_number in structure.start_line_number..=structure.end_line_number {
            map.insert(line_number, structure.structure_id.clone());
        }
    }
    map
}
