//! Keyword assistant - deterministic offline classification
//!
//! Maps columns by header name and classifies rows by keywords found in the
//! description. Guidance may add keywords as `keyword=Tag` pairs separated by
//! `;` or newlines, e.g. `netflix=Subscriptions; gym=Health`.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::result::Result;
use crate::domain::{CandidateTransaction, Classification, ProposedMapping, RawRow, Tag, TransactionType};
use crate::ports::ClassificationAssistant;
use crate::services::mapping::detect_columns;

/// Built-in description keywords and the tag they suggest
const TAG_KEYWORDS: &[(&str, &str)] = &[
    ("starbucks", "Coffee"),
    ("coffee", "Coffee"),
    ("cafe", "Coffee"),
    ("grocer", "Groceries"),
    ("market", "Groceries"),
    ("supermarket", "Groceries"),
    ("bakery", "Groceries"),
    ("uber", "Transport"),
    ("lyft", "Transport"),
    ("taxi", "Transport"),
    ("fuel", "Transport"),
    ("restaurant", "Dining"),
    ("pizza", "Dining"),
    ("netflix", "Subscriptions"),
    ("spotify", "Subscriptions"),
    ("rent", "Housing"),
    ("electric", "Utilities"),
    ("water", "Utilities"),
    ("payroll", "Salary"),
    ("salary", "Salary"),
];

const INCOME_KEYWORDS: &[&str] = &["payroll", "salary", "deposit", "refund", "interest", "dividend"];

const TRANSFER_KEYWORDS: &[&str] = &["transfer", "xfer"];

#[derive(Debug, Default, Clone)]
pub struct KeywordAssistant;

impl KeywordAssistant {
    pub fn new() -> Self {
        Self
    }

    fn classify_one(&self, tx: &CandidateTransaction, extra: &[(String, String)]) -> Classification {
        let lowered = tx.description.to_lowercase();

        let transaction_type = if TRANSFER_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            TransactionType::Transfer
        } else if tx.amount > Decimal::ZERO && INCOME_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            TransactionType::Income
        } else {
            tx.transaction_type
        };

        let mut suggested_tags: Vec<String> = Vec::new();
        let builtin = TAG_KEYWORDS.iter().map(|(k, t)| (*k, *t));
        let custom = extra.iter().map(|(k, t)| (k.as_str(), t.as_str()));
        for (keyword, tag) in custom.chain(builtin) {
            if lowered.contains(keyword) && !suggested_tags.iter().any(|t| t == tag) {
                suggested_tags.push(tag.to_string());
            }
        }

        Classification {
            index: tx.index,
            transaction_type: transaction_type.as_str().to_string(),
            suggested_tags,
        }
    }
}

/// Parse `keyword=Tag` pairs out of free-text guidance
fn guidance_keywords(guidance: Option<&str>) -> Vec<(String, String)> {
    guidance
        .unwrap_or_default()
        .split(|c| c == ';' || c == '\n')
        .filter_map(|pair| {
            let (keyword, tag) = pair.split_once('=')?;
            let keyword = keyword.trim().to_lowercase();
            let tag = tag.trim();
            (!keyword.is_empty() && !tag.is_empty()).then(|| (keyword, tag.to_string()))
        })
        .collect()
}

#[async_trait]
impl ClassificationAssistant for KeywordAssistant {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn detect_mapping(
        &self,
        headers: &[String],
        _samples: &[RawRow],
        _guidance: Option<&str>,
    ) -> Result<Vec<ProposedMapping>> {
        Ok(detect_columns(headers)
            .into_iter()
            .map(|m| ProposedMapping {
                column: m.column,
                field: m.field.as_str().to_string(),
            })
            .collect())
    }

    async fn classify(
        &self,
        transactions: &[CandidateTransaction],
        _existing_tags: &[Tag],
        guidance: Option<&str>,
    ) -> Result<Vec<Classification>> {
        let extra = guidance_keywords(guidance);
        Ok(transactions.iter().map(|tx| self.classify_one(tx, &extra)).collect())
    }
}
