//! Ledgerlift Core - bank-statement CSV import pipeline
//!
//! This crate implements the core import logic following hexagonal
//! architecture:
//!
//! - **domain**: Core entities (RawRow, CandidateTransaction, TagRule, ReviewRow, ...)
//! - **ports**: Trait definitions for collaborators (stores, classification assistant)
//! - **services**: Parsing, mapping, rules, duplicates, the session state machine and commit
//! - **adapters**: Concrete implementations (DuckDB, in-memory, keyword assistant)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::duckdb::DuckDbStore;
use config::Config;
use ports::ClassificationAssistant;
use services::ImportService;

// Re-export commonly used types at crate root
pub use domain::result::{Error, Result};
pub use domain::{
    CandidateTransaction, CanonicalField, ColumnMapping, MatchMode, ReviewRow, TagRule, Transaction,
    TransactionType,
};

/// Database file inside the data directory
pub const DB_FILENAME: &str = "ledgerlift.duckdb";

/// Main context for Ledgerlift operations
///
/// Holds the configuration and the durable store for one data directory and
/// builds import services on top of them.
pub struct LedgerliftContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub store: Arc<DuckDbStore>,
}

impl LedgerliftContext {
    /// Open the data directory, creating it and the database if needed
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let config = Config::load(data_dir)?;
        let store = Arc::new(DuckDbStore::open(&data_dir.join(DB_FILENAME))?);

        Ok(Self {
            config,
            data_dir: data_dir.to_path_buf(),
            store,
        })
    }

    pub fn profile_id(&self) -> &str {
        &self.config.profile_id
    }

    /// Import service for the active profile backed by the durable store
    pub fn import_service(&self, assistant: Option<Arc<dyn ClassificationAssistant>>) -> ImportService {
        let service = ImportService::new(
            self.config.profile_id.clone(),
            self.store.clone(),
            self.store.clone(),
        );
        match assistant {
            Some(assistant) => service.with_assistant(assistant),
            None => service,
        }
    }
}
