pub mod agent;
pub mod audit;
pub mod cache;
pub mod curator;
pub mod dedup;
pub mod editorial;
pub mod extraction;
pub mod filter;
pub mod ingestion;
pub mod llm;
pub mod status;
pub mod worker;
pub mod workflow;

#[cfg(test)]
pub(crate) mod fixtures;

pub use agent::{Agent, AgentSettings};
pub use curator::CuratorService;
pub use dedup::Deduplicator;
pub use ingestion::IngestionService;
pub use llm::LlmClient;
pub use worker::Worker;
