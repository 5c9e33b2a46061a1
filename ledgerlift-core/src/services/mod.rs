//! Service layer - import pipeline and workflow orchestration
//!
//! Leaf services (parser, mapping, normalize, duplicates, rules, classify,
//! commit) are plain functions or thin structs over the ports. The session
//! state machine and the async `ImportService` compose them.

pub mod classify;
pub mod commit;
pub mod duplicates;
pub mod import;
pub mod logging;
pub mod mapping;
pub mod migration;
pub mod normalize;
pub mod parser;
pub mod rules;
pub mod session;

pub use classify::{apply_classifications, ClassificationOutcome};
pub use commit::{CommitSummary, Committer};
pub use duplicates::DuplicateDetector;
pub use import::{ApplyOutcome, ImportService, RulesOutcome, SessionSnapshot, UploadOutcome};
pub use logging::{LogEntry, LogEvent, LoggingService};
pub use mapping::MappingResolution;
pub use migration::{MigrationResult, MigrationService};
pub use rules::{match_count, RuleApplication, RuleEngine};
pub use session::{transition, ImportSession, SessionAction, StageKind};
