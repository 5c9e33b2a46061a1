//! Classification assistant port - assisted mapping and row classification

use async_trait::async_trait;

use crate::domain::result::Result;
use crate::domain::{CandidateTransaction, Classification, ProposedMapping, RawRow, Tag};

/// External suggestion collaborator
///
/// Implementations may call a remote model, a local heuristic or a scripted
/// fake. Responses are treated as untrusted: callers validate every mapping
/// entry and tolerate partial or out-of-range classifications.
#[async_trait]
pub trait ClassificationAssistant: Send + Sync {
    /// Assistant name for diagnostics (e.g., "keyword")
    fn name(&self) -> &str;

    /// Propose a canonical field for CSV columns
    ///
    /// # Arguments
    /// * `headers` - All CSV headers in file order
    /// * `samples` - A few leading data rows
    /// * `guidance` - Optional free-text hint from the user
    async fn detect_mapping(
        &self,
        headers: &[String],
        samples: &[RawRow],
        guidance: Option<&str>,
    ) -> Result<Vec<ProposedMapping>>;

    /// Suggest a type and tags for each transaction, keyed by row index
    ///
    /// # Arguments
    /// * `transactions` - Rows to classify, in session order
    /// * `existing_tags` - The profile's tag vocabulary
    /// * `guidance` - Optional free-text hint from the user
    async fn classify(
        &self,
        transactions: &[CandidateTransaction],
        existing_tags: &[Tag],
        guidance: Option<&str>,
    ) -> Result<Vec<Classification>>;
}
