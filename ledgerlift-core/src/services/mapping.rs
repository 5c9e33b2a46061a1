//! Column mapper - CSV columns to canonical transaction fields

use std::collections::HashSet;

use serde::Serialize;

use crate::domain::result::Result;
use crate::domain::{CanonicalField, ColumnMapping, ProposedMapping, RawRow};
use crate::ports::ClassificationAssistant;

/// Number of leading rows sent to an assistant as samples
pub const SAMPLE_ROWS: usize = 5;

/// A mapping after validation and conflict resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingResolution {
    pub mapping: Vec<ColumnMapping>,
    /// Entries that were demoted to `ignore`, in human-readable form
    pub warnings: Vec<String>,
}

impl MappingResolution {
    /// Column mapped to a field, if any
    pub fn column_for(&self, field: CanonicalField) -> Option<&str> {
        self.mapping
            .iter()
            .find(|m| m.field == field)
            .map(|m| m.column.as_str())
    }
}

/// Accept a caller-supplied mapping as-is, apart from conflict resolution
pub fn explicit(mapping: Vec<ColumnMapping>) -> MappingResolution {
    let mut warnings = Vec::new();
    let mapping = resolve_conflicts(mapping, &mut warnings);
    MappingResolution { mapping, warnings }
}

/// Ask an assistant for a mapping and validate what comes back
pub async fn assisted(
    assistant: &dyn ClassificationAssistant,
    headers: &[String],
    samples: &[RawRow],
    guidance: Option<&str>,
) -> Result<MappingResolution> {
    let proposals = assistant.detect_mapping(headers, samples, guidance).await?;
    Ok(validate_proposals(headers, &proposals))
}

/// Turn assistant proposals into one mapping entry per header
///
/// Proposals naming unknown columns are dropped, unknown targets become
/// `ignore`, and headers the assistant skipped map to `ignore`.
pub fn validate_proposals(headers: &[String], proposals: &[ProposedMapping]) -> MappingResolution {
    let mut warnings = Vec::new();

    for proposal in proposals {
        if !headers.iter().any(|h| *h == proposal.column) {
            warnings.push(format!(
                "Assistant proposed unknown column '{}'; dropped",
                proposal.column
            ));
        }
    }

    let mapping = headers
        .iter()
        .map(|header| {
            let proposal = proposals.iter().find(|p| p.column == *header);
            match proposal.map(|p| p.field.parse::<CanonicalField>()) {
                Some(Ok(field)) => ColumnMapping::new(header.clone(), field),
                Some(Err(e)) => {
                    warnings.push(format!("Column '{}': {}; ignored", header, e));
                    ColumnMapping::ignore(header.clone())
                }
                None => ColumnMapping::ignore(header.clone()),
            }
        })
        .collect();

    let mapping = resolve_conflicts(mapping, &mut warnings);
    MappingResolution { mapping, warnings }
}

/// The first column mapped to a field keeps it; later ones become `ignore`
fn resolve_conflicts(mapping: Vec<ColumnMapping>, warnings: &mut Vec<String>) -> Vec<ColumnMapping> {
    let mut claimed: Vec<(CanonicalField, String)> = Vec::new();

    mapping
        .into_iter()
        .map(|entry| {
            if entry.field == CanonicalField::Ignore {
                return entry;
            }
            if let Some((_, owner)) = claimed.iter().find(|(f, _)| *f == entry.field) {
                warnings.push(format!(
                    "Column '{}' also maps to {}; keeping '{}'",
                    entry.column, entry.field, owner
                ));
                return ColumnMapping::ignore(entry.column);
            }
            claimed.push((entry.field, entry.column.clone()));
            entry
        })
        .collect()
}

const DATE_PATTERNS: &[&str] = &["date", "posted", "txn dt", "dt"];
const AMOUNT_PATTERNS: &[&str] = &["amount", "amt", "total", "value"];
const TYPE_PATTERNS: &[&str] = &["type", "dr/cr", "debit/credit", "kind"];
const DESCRIPTION_PATTERNS: &[&str] = &[
    "description",
    "desc",
    "memo",
    "payee",
    "merchant",
    "details",
    "narration",
    "name",
];
const REFERENCE_PATTERNS: &[&str] = &["reference", "ref", "check", "cheque", "transaction id"];

/// Best-guess mapping from header names alone
///
/// Each field claims the first unclaimed header containing one of its
/// keywords; everything else maps to `ignore`.
pub fn detect_columns(headers: &[String]) -> Vec<ColumnMapping> {
    let fields: [(CanonicalField, &[&str]); 5] = [
        (CanonicalField::TransactionDate, DATE_PATTERNS),
        (CanonicalField::Amount, AMOUNT_PATTERNS),
        (CanonicalField::Type, TYPE_PATTERNS),
        (CanonicalField::Description, DESCRIPTION_PATTERNS),
        (CanonicalField::Reference, REFERENCE_PATTERNS),
    ];

    let mut assigned: Vec<Option<CanonicalField>> = vec![None; headers.len()];
    let mut used: HashSet<usize> = HashSet::new();

    for (field, patterns) in fields {
        let found = headers.iter().enumerate().find(|(i, header)| {
            let lower = header.to_lowercase();
            !used.contains(i) && patterns.iter().any(|p| lower.contains(p))
        });
        if let Some((i, _)) = found {
            used.insert(i);
            assigned[i] = Some(field);
        }
    }

    headers
        .iter()
        .zip(assigned)
        .map(|(header, field)| ColumnMapping::new(header.clone(), field.unwrap_or_default()))
        .collect()
}
