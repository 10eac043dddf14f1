use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single analyzed program: one per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub program_id: String,
    pub program_name: String,
    pub file_name: String,
    pub total_lines: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineType {
    Code,
    Comment,
    Blank,
    Directive,
}

impl fmt::Display for LineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineType::Code => "CODE",
            LineType::Comment => "COMMENT",
            LineType::Blank => "BLANK",
            LineType::Directive => "DIRECTIVE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLine {
    pub line_id: String,
    pub program_id: String,
    pub line_number: u32,
    pub content: String,
    pub line_type: LineType,
    pub structure_id: Option<String>,
}

impl SourceLine {
    pub fn line_id_for(program_id: &str, line_number: u32) -> String {
        format!("{program_id}_{line_number}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StructureType {
    Division,
    Section,
    Paragraph,
}

impl StructureType {
    /// Hierarchy rank: DIVISION=1, SECTION=2, PARAGRAPH=3. Lower is
    /// hierarchically higher (closer to the root).
    pub fn rank(self) -> u8 {
        match self {
            StructureType::Division => 1,
            StructureType::Section => 2,
            StructureType::Paragraph => 3,
        }
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StructureType::Division => "DIVISION",
            StructureType::Section => "SECTION",
            StructureType::Paragraph => "PARAGRAPH",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub structure_id: String,
    pub program_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub structure_type: StructureType,
    pub start_line_number: u32,
    pub end_line_number: u32,
    pub parent_structure_id: Option<String>,
}

impl Structure {
    /// `sec_{program_id}_{NAME_UPPERCASED_WITH_UNDERSCORES}`
    pub fn structure_id_for(program_id: &str, name: &str) -> String {
        let safe_name = name.trim().to_uppercase().replace(' ', "_");
        format!("sec_{program_id}_{safe_name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    File,
    Variable,
    Copybook,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::File => "FILE",
            EntityType::Variable => "VARIABLE",
            EntityType::Copybook => "COPYBOOK",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub program_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub definition_line_id: Option<String>,
    pub description: String,
}

impl Entity {
    /// `{program_id}_{entity_name}` — a pure function of program_id and name.
    pub fn entity_id_for(program_id: &str, name: &str) -> String {
        format!("{program_id}_{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UsageType {
    Reads,
    Writes,
    Updates,
    Validates,
    Opens,
    Closes,
    Declaration,
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UsageType::Reads => "READS",
            UsageType::Writes => "WRITES",
            UsageType::Updates => "UPDATES",
            UsageType::Validates => "VALIDATES",
            UsageType::Opens => "OPENS",
            UsageType::Closes => "CLOSES",
            UsageType::Declaration => "DECLARATION",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReference {
    pub reference_id: String,
    pub source_line_id: String,
    pub target_entity_id: String,
    pub usage_type: UsageType,
}

impl LineReference {
    /// `ref_{source_line_id}_{target_entity_name}`
    pub fn reference_id_for(source_line_id: &str, target_entity_name: &str) -> String {
        format!("ref_{source_line_id}_{target_entity_name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowType {
    Perform,
    GoTo,
    Call,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowType::Perform => "PERFORM",
            FlowType::GoTo => "GO_TO",
            FlowType::Call => "CALL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFlow {
    pub flow_id: String,
    pub source_line_id: String,
    pub target_structure_id: String,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
}

impl ControlFlow {
    /// `flow_{source_line_id}`
    pub fn flow_id_for(source_line_id: &str) -> String {
        format!("flow_{source_line_id}")
    }
}

/// The final writer-ready payload, assembled by the orchestrator and
/// consumed atomically by the Graph Writer stage. Mirrors the single JSON
/// document described for the writer's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphArtifact {
    pub program: Program,
    pub source_lines: Vec<SourceLine>,
    pub structures: Vec<Structure>,
    pub entities: Vec<Entity>,
    pub control_flow: Vec<ControlFlow>,
    pub line_references: Vec<LineReference>,
    pub committed_at: DateTime<Utc>,
}
