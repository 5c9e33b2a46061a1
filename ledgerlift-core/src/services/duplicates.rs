//! Duplicate detector - flags rows whose (date, amount) already exist

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::result::Result;
use crate::domain::{DuplicateProbe, ReviewRow};
use crate::ports::TransactionStore;

/// Checks staged rows against the profile's persisted transactions
///
/// Only date and amount take part in the comparison. Two different purchases
/// of the same amount on the same day are both flagged; flagged rows are
/// excluded from commit but stay visible and can be re-included.
pub struct DuplicateDetector {
    store: Arc<dyn TransactionStore>,
}

impl DuplicateDetector {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Ask the store which composite keys already exist for the profile
    pub async fn check(&self, profile_id: &str, probes: &[DuplicateProbe]) -> Result<HashSet<String>> {
        if probes.is_empty() {
            return Ok(HashSet::new());
        }

        // One probe per distinct key is enough for the lookup
        let mut seen = HashSet::new();
        let unique: Vec<DuplicateProbe> = probes
            .iter()
            .filter(|p| seen.insert(p.key()))
            .cloned()
            .collect();

        self.store.existing_duplicate_keys(profile_id, &unique).await
    }
}

/// Probes for every staged row, in row order
pub fn probes_for(rows: &[ReviewRow]) -> Vec<DuplicateProbe> {
    rows.iter().map(|r| r.transaction.duplicate_probe()).collect()
}

/// Mark rows whose key is in `existing`. Returns the number of rows flagged.
///
/// Rows already flagged keep their current exclusion so a manual re-include
/// survives a repeated check.
pub fn flag_duplicates(rows: &mut [ReviewRow], existing: &HashSet<String>) -> usize {
    let mut flagged = 0;
    for row in rows.iter_mut() {
        if row.duplicate || !existing.contains(&row.transaction.duplicate_key()) {
            continue;
        }
        row.mark_duplicate();
        flagged += 1;
    }
    flagged
}
