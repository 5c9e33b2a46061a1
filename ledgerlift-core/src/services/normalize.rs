//! Row normalizer - mapped raw rows to typed candidate transactions
//!
//! Normalization never fails. Cells that cannot be coerced fall back to safe
//! defaults (zero amount, default type, verbatim date) so that reviewers can
//! fix them before commit.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::{CandidateTransaction, CanonicalField, ColumnMapping, RawRow, TransactionType};

/// Convert raw rows into candidates using a column mapping
///
/// Pure: identical inputs always yield identical outputs. Mapping entries are
/// applied in order, so if two columns target one field the later wins.
pub fn apply_mapping(rows: &[RawRow], mapping: &[ColumnMapping]) -> Vec<CandidateTransaction> {
    rows.iter().map(|row| normalize_row(row, mapping)).collect()
}

fn normalize_row(row: &RawRow, mapping: &[ColumnMapping]) -> CandidateTransaction {
    let mut tx = CandidateTransaction::new(row.index);

    for entry in mapping {
        let Some(cell) = row.get(&entry.column) else {
            continue;
        };
        match entry.field {
            CanonicalField::Type => tx.transaction_type = TransactionType::from_cell(cell),
            CanonicalField::Amount => tx.amount = parse_amount(cell).unwrap_or(Decimal::ZERO),
            CanonicalField::Description => tx.description = cell.trim().to_string(),
            CanonicalField::TransactionDate => tx.transaction_date = normalize_date(cell),
            CanonicalField::Reference => {
                let reference = cell.trim();
                tx.reference = (!reference.is_empty()).then(|| reference.to_string());
            }
            CanonicalField::Ignore => {}
        }
    }

    tx
}

/// Parse a money cell into a signed decimal
///
/// Understands currency symbols, a leading or trailing currency code,
/// thousands separators, trailing minus and `(100.00)` negative notation.
/// Anything else with letters in it (`1e3`) or a comma after the decimal
/// point (`1.234,56`) is not an amount.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let s = s
        .trim()
        .trim_start_matches(char::is_alphabetic)
        .trim_end_matches(char::is_alphabetic)
        .trim();
    if s.chars().any(char::is_alphabetic) {
        return None;
    }
    if s.find('.').is_some_and(|dot| s[dot..].contains(',')) {
        return None;
    }

    let (is_negative, s) = if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        (true, &s[1..s.len() - 1])
    } else if let Some(stripped) = s.strip_suffix('-') {
        (true, stripped)
    } else {
        (false, s)
    };

    // Remove currency symbols, commas, whitespace
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let mut amount: Decimal = cleaned.parse().ok()?;
    if is_negative && amount > Decimal::ZERO {
        amount = -amount;
    }

    Some(amount)
}

// Two-digit years come first: `%Y` would read "24" as year 24
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
];

/// Parse a date cell using the common statement formats
///
/// Ambiguous day/month dates resolve month-first.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    // Some exports append a time component
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// ISO date when the cell is recognizable, otherwise the trimmed cell
pub fn normalize_date(s: &str) -> String {
    parse_date(s)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| s.trim().to_string())
}
