//! Data source adapters.
//!
//! Each adapter is built once at setup and exposes the same two methods;
//! nothing downstream inspects what kind of connection it is talking to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::core::errors::{CompsetError, Result};
use crate::core::table::{Cell, ObservationTable};

/// Synchronous "current filtered table" provider.
pub trait DataSource: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Fetch the current table.
    fn fetch(&self) -> Result<ObservationTable>;
}

/// Source over a table held in memory; replaceable to simulate filter changes.
pub struct InMemorySource {
    table: parking_lot::RwLock<Arc<ObservationTable>>,
}

impl InMemorySource {
    pub fn new(table: ObservationTable) -> Self {
        Self {
            table: parking_lot::RwLock::new(Arc::new(table)),
        }
    }

    /// Swap in a new table.
    pub fn replace(&self, table: ObservationTable) {
        *self.table.write() = Arc::new(table);
    }
}

impl DataSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self) -> Result<ObservationTable> {
        Ok(self.table.read().as_ref().clone())
    }
}

/// JSON file holding an array of record objects.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DataSource for JsonFileSource {
    fn name(&self) -> &str {
        "json"
    }

    fn fetch(&self) -> Result<ObservationTable> {
        let content = read_file(&self.path)?;
        let records: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_str(&content)?;
        debug!("Read {} records from {}", records.len(), self.path.display());
        ObservationTable::from_records(&records)
    }
}

/// Comma-separated file with a header row and optional quoted fields.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DataSource for CsvFileSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self) -> Result<ObservationTable> {
        let content = read_file(&self.path)?;
        let table = parse_csv(&content)?;
        debug!("Read {} rows from {}", table.n_rows(), self.path.display());
        Ok(table)
    }
}

/// Pick an adapter from the file extension.
pub fn source_for_path(path: impl Into<PathBuf>) -> Result<Box<dyn DataSource>> {
    let path = path.into();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("json") => Ok(Box::new(JsonFileSource::new(path))),
        Some("csv") => Ok(Box::new(CsvFileSource::new(path))),
        _ => Err(CompsetError::validation(format!(
            "unsupported input format: {} (expected .json or .csv)",
            path.display()
        ))),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| CompsetError::io(format!("Failed to read input: {}", path.display()), e))
}

/// Parse CSV text into a table. Quoted fields may contain commas, doubled
/// quotes and newlines.
pub fn parse_csv(content: &str) -> Result<ObservationTable> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = split_records(content)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| CompsetError::input_data("CSV input has no header row"))?;
    let columns: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
    let mut table = ObservationTable::new(columns)?;
    for record in records {
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        table.push_row(record.iter().map(|f| Cell::from_text(f)).collect())?;
    }
    Ok(table)
}

fn split_records(content: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            other => field.push(other),
        }
    }
    if in_quotes {
        return Err(CompsetError::input_data("unterminated quoted field in CSV input"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::Coerced;
    use std::io::Write;

    #[test]
    fn test_csv_with_quoted_rating_cells() {
        let csv = "product_id,brand,grip\n\
                   a,Acme,\"7,sturdy handle\"\n\
                   b,\"Zeta, Inc.\",\"NaN,not mentioned\"\r\n\
                   c,Zeta,\"5,\"\"ok\"\"\"\n";
        let table = parse_csv(csv).unwrap();
        assert_eq!(table.columns(), &["product_id", "brand", "grip"]);
        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.text(1, 1).as_deref(), Some("Zeta, Inc."));
        assert_eq!(table.cell(0, 2).map(Cell::coerce), Some(Coerced::Value(7.0)));
        assert_eq!(table.cell(1, 2).map(Cell::coerce), Some(Coerced::Missing));
        assert_eq!(table.text(2, 2).as_deref(), Some("5,\"ok\""));
    }

    #[test]
    fn test_csv_errors() {
        assert!(parse_csv("").is_err());
        assert!(parse_csv("a,b\n1\n").is_err());
        assert!(parse_csv("a,b\n\"1,2\n").is_err());
    }

    #[test]
    fn test_json_file_source() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"product_id": "a", "grip": 3}}, {{"product_id": "b", "grip": "4,good"}}]"#)
            .unwrap();
        let source = source_for_path(file.path()).unwrap();
        assert_eq!(source.name(), "json");
        let table = source.fetch().unwrap();
        assert_eq!(table.numeric_column(1), vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_in_memory_replace() {
        let source = InMemorySource::new(ObservationTable::new(vec!["a".into()]).unwrap());
        assert_eq!(source.fetch().unwrap().n_cols(), 1);
        source.replace(ObservationTable::new(vec!["a".into(), "b".into()]).unwrap());
        assert_eq!(source.fetch().unwrap().n_cols(), 2);
    }

    #[test]
    fn test_unknown_extension() {
        assert!(source_for_path("data.xlsx").is_err());
    }
}
