//! Applying classification suggestions to review rows

use serde::Serialize;
use tracing::debug;

use crate::domain::{Classification, ReviewRow, Tag, TransactionType};

/// What happened to a batch of suggestions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassificationOutcome {
    /// Suggestions that matched a row
    pub applied: usize,
    /// Suggestions whose index matched no row
    pub ignored: usize,
    /// Suggestions whose type was invalid (row type kept)
    pub invalid_types: usize,
    pub tags_added: usize,
}

/// Merge assistant suggestions into the rows they name
///
/// Tolerates partial responses: rows without a suggestion are untouched,
/// unknown indices are skipped, an invalid type keeps the row's type.
/// Suggested tags matching the vocabulary case-insensitively take the
/// vocabulary spelling; other names are kept as new tags.
pub fn apply_classifications(
    rows: &mut [ReviewRow],
    suggestions: &[Classification],
    vocabulary: &[Tag],
) -> ClassificationOutcome {
    let mut outcome = ClassificationOutcome::default();

    for suggestion in suggestions {
        let Some(row) = rows.iter_mut().find(|r| r.index() == suggestion.index) else {
            outcome.ignored += 1;
            continue;
        };
        outcome.applied += 1;

        match suggestion.transaction_type.parse::<TransactionType>() {
            Ok(t) => row.transaction.transaction_type = t,
            Err(_) => outcome.invalid_types += 1,
        }

        for name in &suggestion.suggested_tags {
            if row.add_tag(canonical_tag_name(name, vocabulary)) {
                outcome.tags_added += 1;
            }
        }
    }

    debug!(
        applied = outcome.applied,
        ignored = outcome.ignored,
        invalid_types = outcome.invalid_types,
        "applied classification suggestions"
    );

    outcome
}

fn canonical_tag_name<'a>(name: &'a str, vocabulary: &'a [Tag]) -> &'a str {
    let trimmed = name.trim();
    vocabulary
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(trimmed))
        .map(|t| t.name.as_str())
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateTransaction;

    fn rows(count: usize) -> Vec<ReviewRow> {
        (0..count)
            .map(|i| ReviewRow::new(CandidateTransaction::new(i)))
            .collect()
    }

    fn suggestion(index: usize, t: &str, tags: &[&str]) -> Classification {
        Classification {
            index,
            transaction_type: t.to_string(),
            suggested_tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn vocabulary() -> Vec<Tag> {
        vec![Tag {
            id: "t1".to_string(),
            name: "Groceries".to_string(),
        }]
    }

    #[test]
    fn test_partial_response_only_touches_named_rows() {
        let mut rows = rows(3);
        let outcome = apply_classifications(&mut rows, &[suggestion(1, "income", &["Salary"])], &[]);

        assert_eq!(outcome.applied, 1);
        assert_eq!(rows[1].transaction.transaction_type, TransactionType::Income);
        assert_eq!(rows[1].suggested_tags, vec!["Salary"]);
        assert!(rows[0].suggested_tags.is_empty());
        assert!(rows[2].suggested_tags.is_empty());
    }

    #[test]
    fn test_out_of_range_indices_are_ignored() {
        let mut rows = rows(2);
        let before = rows.clone();
        let outcome = apply_classifications(&mut rows, &[suggestion(99, "income", &["X"])], &[]);
        assert_eq!(outcome.ignored, 1);
        assert_eq!(rows, before);
    }

    #[test]
    fn test_invalid_type_keeps_existing() {
        let mut rows = rows(1);
        rows[0].transaction.transaction_type = TransactionType::Transfer;
        let outcome = apply_classifications(&mut rows, &[suggestion(0, "bananas", &[])], &[]);
        assert_eq!(outcome.invalid_types, 1);
        assert_eq!(rows[0].transaction.transaction_type, TransactionType::Transfer);
    }

    #[test]
    fn test_tags_adopt_vocabulary_spelling() {
        let mut rows = rows(1);
        rows[0].add_tag("Groceries");
        let outcome = apply_classifications(
            &mut rows,
            &[suggestion(0, "expense", &["groceries", " Household "])],
            &vocabulary(),
        );
        assert_eq!(rows[0].suggested_tags, vec!["Groceries", "Household"]);
        assert_eq!(outcome.tags_added, 1);
    }
}
