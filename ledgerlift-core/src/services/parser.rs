//! CSV parser - raw statement text to headers and rows

use csv::{ReaderBuilder, Trim};

use crate::domain::result::{Error, Result};
use crate::domain::{ParsedCsv, RawRow};

/// Parse raw CSV text into a header list and row records
///
/// Records shorter than the header are padded with empty cells, longer ones
/// are truncated. Empty lines are skipped by the reader; every other record
/// is a row, even when all of its cells are empty. Fails when the text has
/// no header or no data rows.
pub fn parse(text: &str) -> Result<ParsedCsv> {
    // Spreadsheet exports often lead with a UTF-8 BOM
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(Error::parse("CSV has no header row"));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut row = RawRow::new(rows.len());
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("").to_string();
            // Repeated header names keep the first column's value
            row.values.entry(header.clone()).or_insert(value);
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(Error::parse("CSV has no data rows"));
    }

    tracing::debug!(headers = headers.len(), rows = rows.len(), "parsed CSV upload");

    Ok(ParsedCsv { headers, rows })
}
