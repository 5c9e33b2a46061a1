//! Transaction domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of money movement for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Expense,
    Income,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Expense => "expense",
            TransactionType::Income => "income",
            TransactionType::Transfer => "transfer",
        }
    }

    /// Coerce a CSV cell into a type, falling back to the default
    pub fn from_cell(cell: &str) -> Self {
        cell.parse().unwrap_or_default()
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expense" | "debit" | "dr" | "withdrawal" | "payment" | "purchase" => {
                Ok(TransactionType::Expense)
            }
            "income" | "credit" | "cr" | "deposit" => Ok(TransactionType::Income),
            "transfer" | "xfer" => Ok(TransactionType::Transfer),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

/// A typed transaction produced from one mapped CSV row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTransaction {
    /// Row index from the uploaded file
    pub index: usize,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    /// ISO date when the cell was recognizable, otherwise the cell verbatim
    pub transaction_date: String,
    pub reference: Option<String>,
}

impl CandidateTransaction {
    /// Empty candidate for a row index with default type and zero amount
    pub fn new(index: usize) -> Self {
        Self {
            index,
            transaction_type: TransactionType::default(),
            amount: Decimal::ZERO,
            description: String::new(),
            transaction_date: String::new(),
            reference: None,
        }
    }

    pub fn duplicate_key(&self) -> String {
        duplicate_key(&self.transaction_date, &self.amount)
    }

    pub fn duplicate_probe(&self) -> DuplicateProbe {
        DuplicateProbe {
            transaction_date: self.transaction_date.clone(),
            amount: self.amount,
        }
    }
}

/// (date, amount) pair sent to the store for duplicate lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateProbe {
    pub transaction_date: String,
    pub amount: Decimal,
}

impl DuplicateProbe {
    pub fn key(&self) -> String {
        duplicate_key(&self.transaction_date, &self.amount)
    }
}

/// Composite duplicate key: `date + ":" + amount`
///
/// The amount is rendered without trailing zeros and `-0` collapses to `0`,
/// so `10.00` and `10` produce the same key.
pub fn duplicate_key(transaction_date: &str, amount: &Decimal) -> String {
    let amount = if amount.is_zero() {
        Decimal::ZERO
    } else {
        amount.normalize()
    };
    format!("{}:{}", transaction_date.trim(), amount)
}

/// A persisted transaction belonging to a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub profile_id: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub transaction_date: String,
    pub reference: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the record to persist from a reviewed candidate
    pub fn from_candidate(profile_id: &str, candidate: &CandidateTransaction, tags: &[String]) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id: profile_id.to_string(),
            transaction_type: candidate.transaction_type,
            amount: candidate.amount,
            description: candidate.description.clone(),
            transaction_date: candidate.transaction_date.clone(),
            reference: candidate.reference.clone(),
            tags: Self::normalize_tags(tags),
            created_at: Utc::now(),
        }
    }

    pub fn duplicate_key(&self) -> String {
        duplicate_key(&self.transaction_date, &self.amount)
    }

    /// Normalize tags: deduplicate, trim whitespace, remove empty
    pub fn normalize_tags(tags: &[String]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut result = Vec::new();

        for tag in tags {
            let trimmed = tag.trim().to_string();
            if !trimmed.is_empty() && seen.insert(trimmed.clone()) {
                result.push(trimmed);
            }
        }

        result
    }
}
