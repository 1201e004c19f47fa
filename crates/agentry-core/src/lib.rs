pub mod agent;
pub mod agents;
pub mod error;
pub mod knowledge;
pub mod model;
pub mod registry;
pub mod storage;
pub mod team;
pub mod teams;
#[cfg(test)]
mod testing;
pub mod tools;

// Re-export key types
pub use agent::{Agent, AgentConfig, RunEvent, RunOptions, RunResponse};
pub use error::CatalogError;
pub use knowledge::{KnowledgeBase, KnowledgeSpec, LoadReport};
pub use model::{ModelFactory, ModelOverrides, SUPPORTED_MODELS};
pub use registry::{Catalog, Runtime};
pub use storage::Database;
pub use team::{Team, TeamConfig, TeamMode};
pub use tools::ToolRegistry;
