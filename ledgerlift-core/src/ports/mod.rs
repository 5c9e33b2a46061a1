//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external collaborators. The import
//! pipeline depends only on these traits, not on concrete implementations.

mod assistant;
mod repository;

pub use assistant::ClassificationAssistant;
pub use repository::{TagRuleStore, TransactionStore};
