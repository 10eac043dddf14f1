use crate::schema;
use async_trait::async_trait;
use cobolgraph_core::{
    ControlFlow, Entity, GraphArtifact, LineReference, PipelineError, Program, Result,
    SourceLine, Structure,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Writes a fully-assembled [`GraphArtifact`] into durable storage. Every
/// implementation commits insert-or-update semantics: reruns over the same
/// program are additive, never destructive, matching the pipeline's no-purge
/// writer contract.
#[async_trait]
pub trait GraphWriter: Send + Sync {
    async fn write(&self, artifact: &GraphArtifact) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SurrealDbConfig {
    pub connection: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for SurrealDbConfig {
    fn default() -> Self {
        Self {
            connection: "mem://".to_string(),
            namespace: "cobolgraph".to_string(),
            database: "graph".to_string(),
            username: None,
            password: None,
        }
    }
}

/// SurrealDB-backed writer. Applies schema once at construction, then commits
/// each artifact's six tables inside a single `BEGIN TRANSACTION` /
/// `COMMIT TRANSACTION` block so a partial failure never leaves the graph in
/// a half-written state for one program.
pub struct SurrealDbWriter {
    db: Arc<Surreal<Any>>,
}

impl SurrealDbWriter {
    pub async fn new(config: SurrealDbConfig) -> Result<Self> {
        info!(connection = %config.connection, "connecting to graph store");
        let db = Surreal::new::<Any>(&config.connection)
            .await
            .map_err(|e| PipelineError::StageFailed(format!("failed to connect: {e}")))?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(surrealdb::opt::auth::Root { username, password })
                .await
                .map_err(|e| PipelineError::StageFailed(format!("authentication failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                PipelineError::StageFailed(format!("failed to select namespace/database: {e}"))
            })?;

        let writer = Self { db: Arc::new(db) };
        writer.initialize_schema().await?;
        Ok(writer)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for statement in schema::all_schemas() {
            self.db
                .query(statement)
                .await
                .map_err(|e| PipelineError::StageFailed(format!("schema definition failed: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl GraphWriter for SurrealDbWriter {
    async fn write(&self, artifact: &GraphArtifact) -> Result<()> {
        debug!(
            program_id = %artifact.program.program_id,
            source_lines = artifact.source_lines.len(),
            structures = artifact.structures.len(),
            entities = artifact.entities.len(),
            control_flow = artifact.control_flow.len(),
            line_references = artifact.line_references.len(),
            "writing graph artifact"
        );

        self.db
            .query("BEGIN TRANSACTION;")
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("failed to begin transaction: {e}")))?;

        let result = self.write_tables(artifact).await;

        match result {
            Ok(()) => {
                self.db
                    .query("COMMIT TRANSACTION;")
                    .await
                    .map_err(|e| {
                        PipelineError::WriterConflict(format!("failed to commit transaction: {e}"))
                    })?;
                Ok(())
            }
            Err(e) => {
                let _ = self.db.query("CANCEL TRANSACTION;").await;
                Err(e)
            }
        }
    }
}

impl SurrealDbWriter {
    /// Writes in the fixed table order — Program, CodeStructure,
    /// SourceCodeLines, DataEntities, LineReferences, ControlFlow — so
    /// children always land after the parents their ids reference.
    async fn write_tables(&self, artifact: &GraphArtifact) -> Result<()> {
        self.upsert_program(&artifact.program).await?;
        for structure in &artifact.structures {
            self.upsert_structure(structure).await?;
        }
        for line in &artifact.source_lines {
            self.upsert_source_line(line).await?;
        }
        for entity in &artifact.entities {
            self.upsert_entity(entity).await?;
        }
        for reference in &artifact.line_references {
            self.upsert_line_reference(reference).await?;
        }
        for flow in &artifact.control_flow {
            self.upsert_control_flow(flow).await?;
        }
        Ok(())
    }

    async fn upsert_program(&self, program: &Program) -> Result<()> {
        let data = serde_json::json!({
            "program_id": program.program_id,
            "program_name": program.program_name,
            "file_name": program.file_name,
            "total_lines": program.total_lines,
        });
        self.db
            .upsert::<Option<serde_json::Value>>(("programs", program.program_id.as_str()))
            .content(data)
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("program upsert failed: {e}")))?;
        Ok(())
    }

    async fn upsert_source_line(&self, line: &SourceLine) -> Result<()> {
        let data = serde_json::json!({
            "line_id": line.line_id,
            "program_id": line.program_id,
            "line_number": line.line_number,
            "content": line.content,
            "line_type": line.line_type.to_string(),
            "structure_id": line.structure_id,
        });
        self.db
            .upsert::<Option<serde_json::Value>>(("source_lines", line.line_id.as_str()))
            .content(data)
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("source line upsert failed: {e}")))?;
        Ok(())
    }

    async fn upsert_structure(&self, structure: &Structure) -> Result<()> {
        let data = serde_json::json!({
            "structure_id": structure.structure_id,
            "program_id": structure.program_id,
            "name": structure.name,
            "structure_type": structure.structure_type.to_string(),
            "start_line_number": structure.start_line_number,
            "end_line_number": structure.end_line_number,
            "parent_structure_id": structure.parent_structure_id,
        });
        self.db
            .upsert::<Option<serde_json::Value>>(("code_structure", structure.structure_id.as_str()))
            .content(data)
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("structure upsert failed: {e}")))?;
        Ok(())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let data = serde_json::json!({
            "entity_id": entity.entity_id,
            "program_id": entity.program_id,
            "name": entity.name,
            "entity_type": entity.entity_type.to_string(),
            "definition_line_id": entity.definition_line_id,
            "description": entity.description,
        });
        self.db
            .upsert::<Option<serde_json::Value>>(("data_entities", entity.entity_id.as_str()))
            .content(data)
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("entity upsert failed: {e}")))?;
        Ok(())
    }

    async fn upsert_line_reference(&self, reference: &LineReference) -> Result<()> {
        let data = serde_json::json!({
            "reference_id": reference.reference_id,
            "source_line_id": reference.source_line_id,
            "target_entity_id": reference.target_entity_id,
            "usage_type": reference.usage_type.to_string(),
        });
        self.db
            .upsert::<Option<serde_json::Value>>(("line_references", reference.reference_id.as_str()))
            .content(data)
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("line reference upsert failed: {e}")))?;
        Ok(())
    }

    async fn upsert_control_flow(&self, flow: &ControlFlow) -> Result<()> {
        let data = serde_json::json!({
            "flow_id": flow.flow_id,
            "source_line_id": flow.source_line_id,
            "target_structure_id": flow.target_structure_id,
            "flow_type": flow.flow_type.to_string(),
        });
        self.db
            .upsert::<Option<serde_json::Value>>(("control_flow", flow.flow_id.as_str()))
            .content(data)
            .await
            .map_err(|e| PipelineError::WriterConflict(format!("control flow upsert failed: {e}")))?;
        Ok(())
    }
}

/// Offline writer backed by concurrent maps, one per table, keyed by each
/// artifact's natural id. Stands in for a live SurrealDB instance in stage
/// and orchestrator tests.
#[derive(Default)]
pub struct InMemoryGraphStore {
    pub programs: DashMap<String, Program>,
    pub source_lines: DashMap<String, SourceLine>,
    pub structures: DashMap<String, Structure>,
    pub entities: DashMap<String, Entity>,
    pub line_references: DashMap<String, LineReference>,
    pub control_flow: DashMap<String, ControlFlow>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots everything currently belonging to one program, keyed by
    /// table name — a convenience for assertions in tests.
    pub fn counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        counts.insert("programs", self.programs.len());
        counts.insert("source_lines", self.source_lines.len());
        counts.insert("code_structure", self.structures.len());
        counts.insert("data_entities", self.entities.len());
        counts.insert("line_references", self.line_references.len());
        counts.insert("control_flow", self.control_flow.len());
        counts
    }
}

#[async_trait]
impl GraphWriter for InMemoryGraphStore {
    async fn write(&self, artifact: &GraphArtifact) -> Result<()> {
        self.programs.insert(
            artifact.program.program_id.clone(),
            artifact.program.clone(),
        );
        for line in &artifact.source_lines {
            self.source_lines.insert(line.line_id.clone(), line.clone());
        }
        for structure in &artifact.structures {
            self.structures
                .insert(structure.structure_id.clone(), structure.clone());
        }
        for entity in &artifact.entities {
            self.entities.insert(entity.entity_id.clone(), entity.clone());
        }
        for reference in &artifact.line_references {
            self.line_references
                .insert(reference.reference_id.clone(), reference.clone());
        }
        for flow in &artifact.control_flow {
            self.control_flow.insert(flow.flow_id.clone(), flow.clone());
        }
        Ok(())
    }
}
