//! Taal coach orchestrator
//!
//! Chat orchestration for a financial coach:
//! - A static registry of user-owned record tables
//! - Owner-scoped list/get/create/update with validation and defaults
//! - A fixed tool surface the chat model calls against those records
//! - A bounded tool-calling conversation loop per chat turn
//! - Background long-term memory consolidation and recall
//!
//! TURN:
//! COMPOSE → MODEL → TOOLS → MODEL … → REPLY → (background) MEMORY

pub mod agent;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod records;
pub mod registry;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Result;

// Re-export common types
pub use agent::{Orchestrator, OrchestratorConfig, TurnOutcome};
pub use config::Settings;
pub use models::*;
