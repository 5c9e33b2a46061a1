//! Raw CSV rows and column mappings

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One data row of an uploaded CSV, keyed by header name
///
/// Raw rows only live between upload and mapping-apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// Zero-based position among the data rows; stable for the whole session
    pub index: usize,
    pub values: HashMap<String, String>,
}

impl RawRow {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            values: HashMap::new(),
        }
    }

    /// Cell value for a column, if the column exists
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// Output of the CSV parser: header list plus data rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl ParsedCsv {
    /// First `limit` rows, used as samples for assisted mapping
    pub fn samples(&self, limit: usize) -> &[RawRow] {
        &self.rows[..self.rows.len().min(limit)]
    }
}

/// Canonical transaction field a CSV column may map to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Type,
    Amount,
    Description,
    TransactionDate,
    Reference,
    #[default]
    Ignore,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 6] = [
        CanonicalField::Type,
        CanonicalField::Amount,
        CanonicalField::Description,
        CanonicalField::TransactionDate,
        CanonicalField::Reference,
        CanonicalField::Ignore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::Type => "type",
            CanonicalField::Amount => "amount",
            CanonicalField::Description => "description",
            CanonicalField::TransactionDate => "transaction_date",
            CanonicalField::Reference => "reference",
            CanonicalField::Ignore => "ignore",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "type" => Ok(CanonicalField::Type),
            "amount" => Ok(CanonicalField::Amount),
            "description" => Ok(CanonicalField::Description),
            "transaction_date" | "date" => Ok(CanonicalField::TransactionDate),
            "reference" => Ok(CanonicalField::Reference),
            "ignore" => Ok(CanonicalField::Ignore),
            _ => Err(format!("unknown field '{}'", s.trim())),
        }
    }
}

/// Maps one CSV column onto a canonical field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub column: String,
    pub field: CanonicalField,
}

impl ColumnMapping {
    pub fn new(column: impl Into<String>, field: CanonicalField) -> Self {
        Self {
            column: column.into(),
            field,
        }
    }

    pub fn ignore(column: impl Into<String>) -> Self {
        Self::new(column, CanonicalField::Ignore)
    }
}

/// A mapping entry as proposed by an external assistant, before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedMapping {
    pub column: String,
    pub field: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_field_parsing() {
        assert_eq!("amount".parse::<CanonicalField>(), Ok(CanonicalField::Amount));
        assert_eq!(
            "Transaction Date".parse::<CanonicalField>(),
            Ok(CanonicalField::TransactionDate)
        );
        assert_eq!("date".parse::<CanonicalField>(), Ok(CanonicalField::TransactionDate));
        assert!("category".parse::<CanonicalField>().is_err());
    }

    #[test]
    fn test_canonical_field_serde_names() {
        let json = serde_json::to_string(&CanonicalField::TransactionDate).unwrap();
        assert_eq!(json, "\"transaction_date\"");
        for field in CanonicalField::ALL {
            assert_eq!(field.as_str().parse::<CanonicalField>(), Ok(field));
        }
    }

    #[test]
    fn test_samples_are_bounded() {
        let parsed = ParsedCsv {
            headers: vec!["A".to_string()],
            rows: (0..3).map(RawRow::new).collect(),
        };
        assert_eq!(parsed.samples(5).len(), 3);
        assert_eq!(parsed.samples(2).len(), 2);
    }
}
