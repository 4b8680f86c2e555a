//! Raw observation tables.
//!
//! An [`ObservationTable`] is the immutable input of an analysis run: one row
//! per competing item, with identifier, brand, attribute and optional revenue
//! columns. Cells keep whatever the data source delivered; numeric coercion
//! happens lazily when a stage asks for a number.

use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::core::errors::{CompsetError, Result};

/// Leading 0-10 score in rating text such as `"7,sturdy handle"`.
static RATING_SCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(10|[0-9])\b").expect("rating regex is valid"));

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Numeric value (may be non-finite, which counts as missing)
    Number(f64),
    /// Free text
    Text(String),
    /// Missing value
    Missing,
}

/// Outcome of coercing a cell to a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coerced {
    /// Usable finite number
    Value(f64),
    /// Explicitly or implicitly missing
    Missing,
    /// Text that is not a number
    NotNumeric,
}

impl Cell {
    /// Build a cell from a JSON value.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Missing,
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Missing, Self::Number),
            serde_json::Value::Bool(b) => Self::Number(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::String(s) => Self::from_text(s),
            other => Self::Text(other.to_string()),
        }
    }

    /// Build a cell from raw text, treating blanks as missing.
    pub fn from_text(text: &str) -> Self {
        if text.trim().is_empty() {
            Self::Missing
        } else {
            Self::Text(text.to_string())
        }
    }

    /// Coerce this cell to a number.
    pub fn coerce(&self) -> Coerced {
        match self {
            Self::Number(v) if v.is_finite() => Coerced::Value(*v),
            Self::Number(_) | Self::Missing => Coerced::Missing,
            Self::Text(s) => coerce_text(s),
        }
    }

    /// Text rendering of the cell, `None` when missing.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Number(v) if v.is_finite() => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    Some(format!("{}", *v as i64))
                } else {
                    Some(v.to_string())
                }
            }
            Self::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Coerce a text cell: plain numbers, NA markers, and `score,reason` ratings.
pub fn coerce_text(raw: &str) -> Coerced {
    let text = raw.trim();
    if text.is_empty() {
        return Coerced::Missing;
    }
    if matches!(
        text.to_ascii_lowercase().as_str(),
        "na" | "n/a" | "nan" | "null" | "none"
    ) {
        return Coerced::Missing;
    }
    if let Ok(v) = text.parse::<f64>() {
        return if v.is_finite() {
            Coerced::Value(v)
        } else {
            Coerced::Missing
        };
    }
    if text.contains(',') || text.contains('，') {
        return parse_rating(text);
    }
    Coerced::NotNumeric
}

/// Parse `score,reason` rating text into its leading 0-10 score.
pub fn parse_rating(text: &str) -> Coerced {
    if text.to_lowercase().contains("nan") {
        return Coerced::Missing;
    }
    let head = text.split([',', '，']).next().unwrap_or_default();
    match RATING_SCORE.find(head) {
        Some(m) => m
            .as_str()
            .parse::<f64>()
            .map_or(Coerced::Missing, Coerced::Value),
        None => Coerced::Missing,
    }
}

/// Immutable table of competing items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl ObservationTable {
    /// Create an empty table with the given column names.
    pub fn new(columns: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(CompsetError::input_data_column(
                    format!("duplicate column '{column}'"),
                    column.clone(),
                ));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Append a row; its width must match the header.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(CompsetError::input_data(format!(
                "row {} has {} cells, expected {}",
                self.rows.len(),
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Build a table from JSON records; column order follows first appearance.
    pub fn from_records(records: &[serde_json::Map<String, serde_json::Value>]) -> Result<Self> {
        let mut order: IndexMap<String, ()> = IndexMap::new();
        for record in records {
            for key in record.keys() {
                order.entry(key.clone()).or_insert(());
            }
        }
        let columns: Vec<String> = order.into_keys().collect();
        let mut table = Self::new(columns)?;
        for record in records {
            let row = table
                .columns
                .iter()
                .map(|c| record.get(c).map_or(Cell::Missing, Cell::from_json))
                .collect();
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of a column by case-insensitive name.
    pub fn column_index_ci(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Cell at `(row, col)`.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Whether every present cell of a column coerces to a number.
    pub fn is_numeric_column(&self, col: usize) -> bool {
        // all-missing columns count as numeric with a 100% NA rate
        self.rows
            .iter()
            .all(|r| !matches!(r[col].coerce(), Coerced::NotNumeric))
    }

    /// Numeric values of a column, `None` for missing cells.
    pub fn numeric_column(&self, col: usize) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| match r[col].coerce() {
                Coerced::Value(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Text value of a cell, `None` when missing.
    pub fn text(&self, row: usize, col: usize) -> Option<String> {
        self.cell(row, col).and_then(Cell::as_text)
    }

    /// Stable fingerprint of the table contents.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Xxh3::new();
        for column in &self.columns {
            hasher.update(column.as_bytes());
            hasher.update(&[0]);
        }
        for row in &self.rows {
            for cell in row {
                match cell {
                    Cell::Number(v) => {
                        hasher.update(&[1]);
                        hasher.update(&v.to_bits().to_le_bytes());
                    }
                    Cell::Text(s) => {
                        hasher.update(&[2]);
                        hasher.update(s.as_bytes());
                    }
                    Cell::Missing => hasher.update(&[3]),
                }
            }
            hasher.update(&[0xff]);
        }
        hasher.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(value: serde_json::Value) -> Vec<serde_json::Map<String, serde_json::Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_rating_text_coercion() {
        assert_eq!(coerce_text("7,very sturdy"), Coerced::Value(7.0));
        assert_eq!(coerce_text("10，非常好用"), Coerced::Value(10.0));
        assert_eq!(coerce_text("NaN,not mentioned"), Coerced::Missing);
        assert_eq!(coerce_text("no score, sorry"), Coerced::Missing);
        assert_eq!(coerce_text("3.25"), Coerced::Value(3.25));
        assert_eq!(coerce_text("NA"), Coerced::Missing);
        assert_eq!(coerce_text("B0001YH1A2"), Coerced::NotNumeric);
    }

    #[test]
    fn test_from_records_keeps_first_seen_order() {
        let table = ObservationTable::from_records(&records(json!([
            {"product_id": "a", "brand": "X", "grip": 3.0},
            {"product_id": "b", "brand": "Y", "grip": null, "sales": 10}
        ])))
        .unwrap();

        assert_eq!(table.columns(), &["product_id", "brand", "grip", "sales"]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.cell(0, 3), Some(&Cell::Missing));
        assert_eq!(table.numeric_column(2), vec![Some(3.0), None]);
    }

    #[test]
    fn test_numeric_column_detection() {
        let table = ObservationTable::from_records(&records(json!([
            {"id": "a", "brand": "X", "grip": "7,good"},
            {"id": "b", "brand": "Y", "grip": "NaN,not mentioned"}
        ])))
        .unwrap();

        assert!(!table.is_numeric_column(0));
        assert!(!table.is_numeric_column(1));
        assert!(table.is_numeric_column(2));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let err = ObservationTable::new(vec!["a".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, CompsetError::InputData { .. }));
    }

    #[test]
    fn test_row_width_checked() {
        let mut table = ObservationTable::new(vec!["a".into(), "b".into()]).unwrap();
        assert!(table.push_row(vec![Cell::Number(1.0)]).is_err());
        assert!(table
            .push_row(vec![Cell::Number(1.0), Cell::Missing])
            .is_ok());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = ObservationTable::from_records(&records(json!([{"x": 1.0}]))).unwrap();
        let b = ObservationTable::from_records(&records(json!([{"x": 1.0}]))).unwrap();
        let c = ObservationTable::from_records(&records(json!([{"x": 2.0}]))).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_integer_text_rendering() {
        assert_eq!(Cell::Number(42.0).as_text().as_deref(), Some("42"));
        assert_eq!(Cell::Number(1.5).as_text().as_deref(), Some("1.5"));
        assert_eq!(Cell::Missing.as_text(), None);
    }
}
