/// SurrealQL schema definitions for the six writer tables. Field names
/// mirror the columns named for the writer's insert-or-update statements;
/// `structures` and `line_references`/`control_flow` additionally carry
/// graph edges so traversal queries (entity usages, paragraph call graph)
/// read as `RELATE` hops rather than joins.
pub const PROGRAMS_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS programs SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS program_id ON TABLE programs TYPE string;
    DEFINE FIELD IF NOT EXISTS program_name ON TABLE programs TYPE string;
    DEFINE FIELD IF NOT EXISTS file_name ON TABLE programs TYPE string;
    DEFINE FIELD IF NOT EXISTS total_lines ON TABLE programs TYPE number;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE programs TYPE datetime DEFAULT time::now();
    DEFINE FIELD IF NOT EXISTS updated_at ON TABLE programs TYPE datetime DEFAULT time::now();

    DEFINE INDEX IF NOT EXISTS idx_programs_id ON TABLE programs COLUMNS program_id UNIQUE;
"#;

pub const SOURCE_LINES_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS source_lines SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS line_id ON TABLE source_lines TYPE string;
    DEFINE FIELD IF NOT EXISTS program_id ON TABLE source_lines TYPE string;
    DEFINE FIELD IF NOT EXISTS line_number ON TABLE source_lines TYPE number;
    DEFINE FIELD IF NOT EXISTS content ON TABLE source_lines TYPE string;
    DEFINE FIELD IF NOT EXISTS line_type ON TABLE source_lines TYPE string;
    DEFINE FIELD IF NOT EXISTS structure_id ON TABLE source_lines TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE source_lines TYPE datetime DEFAULT time::now();
    DEFINE FIELD IF NOT EXISTS updated_at ON TABLE source_lines TYPE datetime DEFAULT time::now();

    DEFINE INDEX IF NOT EXISTS idx_source_lines_id ON TABLE source_lines COLUMNS line_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_source_lines_program ON TABLE source_lines COLUMNS program_id;
    DEFINE INDEX IF NOT EXISTS idx_source_lines_structure ON TABLE source_lines COLUMNS structure_id;
"#;

pub const CODE_STRUCTURE_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS code_structure SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS structure_id ON TABLE code_structure TYPE string;
    DEFINE FIELD IF NOT EXISTS program_id ON TABLE code_structure TYPE string;
    DEFINE FIELD IF NOT EXISTS name ON TABLE code_structure TYPE string;
    DEFINE FIELD IF NOT EXISTS structure_type ON TABLE code_structure TYPE string;
    DEFINE FIELD IF NOT EXISTS start_line_number ON TABLE code_structure TYPE number;
    DEFINE FIELD IF NOT EXISTS end_line_number ON TABLE code_structure TYPE number;
    DEFINE FIELD IF NOT EXISTS parent_structure_id ON TABLE code_structure TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE code_structure TYPE datetime DEFAULT time::now();
    DEFINE FIELD IF NOT EXISTS updated_at ON TABLE code_structure TYPE datetime DEFAULT time::now();

    DEFINE INDEX IF NOT EXISTS idx_structure_id ON TABLE code_structure COLUMNS structure_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_structure_program ON TABLE code_structure COLUMNS program_id;
    DEFINE INDEX IF NOT EXISTS idx_structure_parent ON TABLE code_structure COLUMNS parent_structure_id;
"#;

pub const DATA_ENTITIES_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS data_entities SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS entity_id ON TABLE data_entities TYPE string;
    DEFINE FIELD IF NOT EXISTS program_id ON TABLE data_entities TYPE string;
    DEFINE FIELD IF NOT EXISTS name ON TABLE data_entities TYPE string;
    DEFINE FIELD IF NOT EXISTS entity_type ON TABLE data_entities TYPE string;
    DEFINE FIELD IF NOT EXISTS definition_line_id ON TABLE data_entities TYPE option<string>;
    DEFINE FIELD IF NOT EXISTS description ON TABLE data_entities TYPE string;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE data_entities TYPE datetime DEFAULT time::now();
    DEFINE FIELD IF NOT EXISTS updated_at ON TABLE data_entities TYPE datetime DEFAULT time::now();

    DEFINE INDEX IF NOT EXISTS idx_entity_id ON TABLE data_entities COLUMNS entity_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_entity_program ON TABLE data_entities COLUMNS program_id;
    DEFINE INDEX IF NOT EXISTS idx_entity_name ON TABLE data_entities COLUMNS name;
"#;

pub const LINE_REFERENCES_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS line_references SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS reference_id ON TABLE line_references TYPE string;
    DEFINE FIELD IF NOT EXISTS source_line_id ON TABLE line_references TYPE string;
    DEFINE FIELD IF NOT EXISTS target_entity_id ON TABLE line_references TYPE string;
    DEFINE FIELD IF NOT EXISTS usage_type ON TABLE line_references TYPE string;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE line_references TYPE datetime DEFAULT time::now();

    DEFINE INDEX IF NOT EXISTS idx_reference_id ON TABLE line_references COLUMNS reference_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_reference_source ON TABLE line_references COLUMNS source_line_id;
    DEFINE INDEX IF NOT EXISTS idx_reference_target ON TABLE line_references COLUMNS target_entity_id;
"#;

pub const CONTROL_FLOW_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS control_flow SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS flow_id ON TABLE control_flow TYPE string;
    DEFINE FIELD IF NOT EXISTS source_line_id ON TABLE control_flow TYPE string;
    DEFINE FIELD IF NOT EXISTS target_structure_id ON TABLE control_flow TYPE string;
    DEFINE FIELD IF NOT EXISTS flow_type ON TABLE control_flow TYPE string;
    DEFINE FIELD IF NOT EXISTS created_at ON TABLE control_flow TYPE datetime DEFAULT time::now();

    DEFINE INDEX IF NOT EXISTS idx_flow_id ON TABLE control_flow COLUMNS flow_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS idx_flow_source ON TABLE control_flow COLUMNS source_line_id;
    DEFINE INDEX IF NOT EXISTS idx_flow_target ON TABLE control_flow COLUMNS target_structure_id;
"#;

pub const SCHEMA_VERSION_SCHEMA: &str = r#"
    DEFINE TABLE IF NOT EXISTS schema_versions SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS version ON TABLE schema_versions TYPE number;
    DEFINE FIELD IF NOT EXISTS applied_at ON TABLE schema_versions TYPE datetime DEFAULT time::now();
    DEFINE FIELD IF NOT EXISTS description ON TABLE schema_versions TYPE string;

    DEFINE INDEX IF NOT EXISTS idx_schema_version ON TABLE schema_versions COLUMNS version UNIQUE;
"#;

/// All table definitions, in the fixed order the writer applies them —
/// parents before children so foreign-key-shaped references never point
/// at an undefined table.
pub fn all_schemas() -> [&'static str; 7] {
    [
        PROGRAMS_SCHEMA,
        CODE_STRUCTURE_SCHEMA,
        SOURCE_LINES_SCHEMA,
        DATA_ENTITIES_SCHEMA,
        LINE_REFERENCES_SCHEMA,
        CONTROL_FLOW_SCHEMA,
        SCHEMA_VERSION_SCHEMA,
    ]
}
