pub mod orchestrator;
pub mod retry;
pub mod stage1_ingest;
pub mod stage2_structure;
pub mod stage3_entities;
pub mod stage4_flow;

pub use orchestrator::{render_sentinel_payload, Orchestrator, ProgressEvent, JSON_END_SENTINEL, JSON_START_SENTINEL};
pub use retry::{retry_with_backoff, upstream_error};
pub use stage1_ingest::LineIngestor;
pub use stage2_structure::StructureIdentifier;
pub use stage3_entities::EntityExtractor;
pub use stage4_flow::FlowExtractor;
