//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod mapping;
mod review;
mod rule;
mod transaction;
pub mod result;

pub use mapping::{CanonicalField, ColumnMapping, ParsedCsv, ProposedMapping, RawRow};
pub use review::{Classification, ReviewRow, RowEdit, Tag};
pub use rule::{MatchMode, TagRule};
pub use transaction::{
    duplicate_key, CandidateTransaction, DuplicateProbe, Transaction, TransactionType,
};
