pub mod schema;
pub mod writer;

pub use writer::{GraphWriter, InMemoryGraphStore, SurrealDbConfig, SurrealDbWriter};
