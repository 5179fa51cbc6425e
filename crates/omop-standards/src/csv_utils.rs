//! Shared CSV reading for resource and mapping files.

use std::collections::BTreeMap;
use std::io::Read;

use csv::ReaderBuilder;

/// One data row keyed by normalized header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    /// Line number in the file; the header is line 1.
    pub line: usize,
    pub fields: BTreeMap<String, String>,
}

impl CsvRow {
    /// Trimmed value, empty when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.fields.get(column).map_or("", String::as_str)
    }

    /// Trimmed value, `None` when absent or empty.
    pub fn get_optional(&self, column: &str) -> Option<&str> {
        Some(self.get(column)).filter(|value| !value.is_empty())
    }
}

/// Headers plus rows of a CSV document.
#[derive(Debug, Clone, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<CsvRow>,
}

impl CsvTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|header| header == column)
    }
}

/// Normalizes a header cell: BOM and whitespace stripped, lowercase.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_matches('\u{feff}').trim().to_lowercase()
}

/// Read a CSV document into rows keyed by normalized header.
///
/// Handles BOM characters and trims whitespace from values. Fully blank
/// lines are skipped.
pub fn read_csv_table<R: Read>(reader: R) -> Result<CsvTable, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map_or(idx + 2, |position| position.line() as usize);
        let mut fields = BTreeMap::new();
        for (idx, value) in record.iter().enumerate() {
            let Some(key) = headers.get(idx) else {
                continue;
            };
            fields.insert(key.clone(), value.trim().to_string());
        }
        rows.push(CsvRow { line, fields });
    }
    Ok(CsvTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rows_with_bom_and_line_numbers() {
        let data = "\u{feff}Trial , Source_Field\nIMPRESS, sex \n,\nDRUP,dob\n";
        let table = read_csv_table(data.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["trial", "source_field"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].line, 2);
        assert_eq!(table.rows[0].get("source_field"), "sex");
        assert_eq!(table.rows[1].line, 4);
        assert_eq!(table.rows[1].get_optional("missing"), None);
    }
}
