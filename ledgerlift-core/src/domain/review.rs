//! Review rows, tags and classification suggestions

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::transaction::{CandidateTransaction, TransactionType};

/// A candidate transaction staged for review before commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRow {
    #[serde(flatten)]
    pub transaction: CandidateTransaction,
    /// Insertion-ordered, duplicate-free
    pub suggested_tags: Vec<String>,
    pub excluded: bool,
    pub duplicate: bool,
    /// Set once a rule pass matched this row; never cleared by later passes
    pub rules_applied: bool,
}

impl ReviewRow {
    pub fn new(transaction: CandidateTransaction) -> Self {
        Self {
            transaction,
            suggested_tags: Vec::new(),
            excluded: false,
            duplicate: false,
            rules_applied: false,
        }
    }

    pub fn index(&self) -> usize {
        self.transaction.index
    }

    pub fn description(&self) -> &str {
        &self.transaction.description
    }

    /// Add a tag with set semantics. Returns true if the tag was new.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.suggested_tags.iter().any(|t| t == tag) {
            return false;
        }
        self.suggested_tags.push(tag.to_string());
        true
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.suggested_tags.len();
        self.suggested_tags.retain(|t| t != tag.trim());
        self.suggested_tags.len() != before
    }

    /// Flag as an existing duplicate; duplicates start out excluded
    pub fn mark_duplicate(&mut self) {
        self.duplicate = true;
        self.excluded = true;
    }
}

/// Entry of a profile's tag vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

/// Per-row suggestion returned by a classification assistant
///
/// The type stays a raw string: assistants may answer with anything and
/// invalid values are resolved when the suggestion is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub index: usize,
    #[serde(rename = "type")]
    pub transaction_type: String,
    #[serde(default)]
    pub suggested_tags: Vec<String>,
}

/// Manual edit of a single review row; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowEdit {
    pub transaction_type: Option<TransactionType>,
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub transaction_date: Option<String>,
    /// `Some(None)` clears the reference
    pub reference: Option<Option<String>>,
    /// Replaces the whole tag set
    pub tags: Option<Vec<String>>,
    pub excluded: Option<bool>,
}

impl RowEdit {
    pub fn apply(&self, row: &mut ReviewRow) {
        let tx = &mut row.transaction;
        if let Some(t) = self.transaction_type {
            tx.transaction_type = t;
        }
        if let Some(amount) = self.amount {
            tx.amount = amount;
        }
        if let Some(description) = &self.description {
            tx.description = description.clone();
        }
        if let Some(date) = &self.transaction_date {
            tx.transaction_date = date.trim().to_string();
        }
        if let Some(reference) = &self.reference {
            tx.reference = reference.clone();
        }
        if let Some(tags) = &self.tags {
            row.suggested_tags.clear();
            for tag in tags {
                row.add_tag(tag);
            }
        }
        if let Some(excluded) = self.excluded {
            row.excluded = excluded;
        }
    }
}
