//! Committer - persists reviewed rows with partial-failure reporting

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{ReviewRow, Transaction};
use crate::ports::TransactionStore;

/// Outcome of a commit: never all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub imported: usize,
    pub errors: Vec<String>,
}

impl CommitSummary {
    pub fn attempted(&self) -> usize {
        self.imported + self.errors.len()
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Writes non-excluded review rows to the transaction store one by one
pub struct Committer {
    store: Arc<dyn TransactionStore>,
}

impl Committer {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Persist every non-excluded row independently
    ///
    /// A failing row is recorded as `row <index>: <cause>` and the batch
    /// carries on.
    pub async fn commit(&self, profile_id: &str, rows: &[ReviewRow]) -> CommitSummary {
        let mut summary = CommitSummary::default();

        for row in rows.iter().filter(|r| !r.excluded) {
            let tx = Transaction::from_candidate(profile_id, &row.transaction, &row.suggested_tags);
            match self.store.insert_transaction(profile_id, &tx).await {
                Ok(()) => summary.imported += 1,
                Err(e) => {
                    warn!(row = row.index(), error = %e, "failed to persist row");
                    summary.errors.push(format!("row {}: {}", row.index(), e));
                }
            }
        }

        info!(
            imported = summary.imported,
            failed = summary.errors.len(),
            "commit finished"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::CandidateTransaction;

    fn rows(count: usize) -> Vec<ReviewRow> {
        (0..count)
            .map(|i| {
                let mut tx = CandidateTransaction::new(i);
                tx.transaction_date = format!("2024-01-{:02}", i + 1);
                tx.amount = Decimal::new(100 * (i as i64 + 1), 2);
                tx.description = format!("ROW {}", i);
                ReviewRow::new(tx)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_commit_skips_excluded_rows() {
        let store = Arc::new(MemoryStore::new());
        let committer = Committer::new(store.clone());

        let mut rows = rows(5);
        rows[1].excluded = true;
        rows[3].excluded = true;

        let summary = committer.commit("p1", &rows).await;
        assert_eq!(summary.imported, 3);
        assert!(summary.is_complete());
        assert_eq!(store.transactions("p1").len(), 3);
    }

    #[tokio::test]
    async fn test_commit_continues_after_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_insert_for("ROW 2");
        let committer = Committer::new(store.clone());

        let mut rows = rows(6);
        rows[0].excluded = true;

        let summary = committer.commit("p1", &rows).await;
        // K = 6, E = 1, one failure
        assert_eq!(summary.attempted(), 5);
        assert_eq!(summary.imported, 4);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("row 2:"));
        assert_eq!(store.insert_attempts(), 5);
    }

    #[tokio::test]
    async fn test_commit_carries_tags() {
        let store = Arc::new(MemoryStore::new());
        let committer = Committer::new(store.clone());

        let mut rows = rows(1);
        rows[0].add_tag("Coffee");

        committer.commit("p1", &rows).await;
        let saved = store.transactions("p1");
        assert_eq!(saved[0].tags, vec!["Coffee"]);
        assert_eq!(saved[0].profile_id, "p1");
    }
}
