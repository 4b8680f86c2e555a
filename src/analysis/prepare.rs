//! Column/row filtering and the optional floor transform.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::config::AnalysisSettings;
use crate::core::errors::{CompsetError, Result};
use crate::core::table::ObservationTable;

/// Minimum number of complete rows an analysis needs.
pub const MIN_COMPLETE_ROWS: usize = 3;

/// Why a candidate column was not retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DropReason {
    /// Excluded by name or used as a key/revenue column
    Excluded,
    /// Contains text that is not numeric
    NonNumeric,
    /// Missing proportion above the NA threshold
    TooManyMissing(f64),
}

/// Numeric submatrix with every cell finite and every row complete.
#[derive(Debug, Clone)]
pub struct CleanedMatrix {
    /// Retained attribute names, one per matrix column
    pub attributes: Vec<String>,
    /// Item-by-attribute values
    pub values: Array2<f64>,
    /// Source table row of each matrix row
    pub source_rows: Vec<usize>,
    /// Floor-transformed values, present only when requested and finite
    pub floored: Option<Array2<f64>>,
    /// Columns that were considered and dropped
    pub dropped: Vec<(String, DropReason)>,
}

impl CleanedMatrix {
    /// Number of items.
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of attributes.
    pub fn n_cols(&self) -> usize {
        self.values.ncols()
    }

    /// Values used for similarity clustering: floored when available.
    pub fn similarity_values(&self) -> &Array2<f64> {
        self.floored.as_ref().unwrap_or(&self.values)
    }
}

/// Filters a raw table down to a [`CleanedMatrix`].
#[derive(Debug, Clone)]
pub struct DataPreparer {
    na_threshold: f64,
    modify_data: bool,
    excluded: Vec<String>,
}

impl DataPreparer {
    /// Build a preparer from analysis settings.
    pub fn new(settings: &AnalysisSettings) -> Self {
        let mut excluded: Vec<String> = settings
            .excluded_columns
            .iter()
            .chain(std::iter::once(&settings.id_column))
            .chain(std::iter::once(&settings.brand_column))
            .chain(settings.revenue_candidates.iter())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        excluded.sort();
        excluded.dedup();

        Self {
            na_threshold: settings.na_threshold,
            modify_data: settings.modify_data,
            excluded,
        }
    }

    fn is_excluded(&self, column: &str) -> bool {
        let lowered = column.to_ascii_lowercase();
        self.excluded.binary_search(&lowered).is_ok()
    }

    /// Filter columns and rows, then apply the floor transform if enabled.
    pub fn prepare(&self, table: &ObservationTable) -> Result<CleanedMatrix> {
        let mut dropped = Vec::new();
        let mut numeric_columns = Vec::new();

        for (idx, name) in table.columns().iter().enumerate() {
            if self.is_excluded(name) {
                dropped.push((name.clone(), DropReason::Excluded));
            } else if table.is_numeric_column(idx) {
                numeric_columns.push(idx);
            } else {
                dropped.push((name.clone(), DropReason::NonNumeric));
            }
        }

        if numeric_columns.is_empty() {
            return Err(CompsetError::input_data("no numeric attribute columns"));
        }

        let n_rows = table.n_rows();
        let mut retained: Vec<(usize, Vec<Option<f64>>)> = Vec::new();
        for idx in numeric_columns {
            let values = table.numeric_column(idx);
            let missing = values.iter().filter(|v| v.is_none()).count();
            let proportion = if n_rows == 0 {
                1.0
            } else {
                missing as f64 / n_rows as f64
            };
            if proportion <= self.na_threshold {
                retained.push((idx, values));
            } else {
                dropped.push((
                    table.columns()[idx].clone(),
                    DropReason::TooManyMissing(proportion),
                ));
            }
        }

        if retained.is_empty() {
            return Err(CompsetError::input_data(format!(
                "no attribute column has at most {:.0}% missing values",
                self.na_threshold * 100.0
            )));
        }

        let source_rows: Vec<usize> = (0..n_rows)
            .filter(|&row| retained.iter().all(|(_, values)| values[row].is_some()))
            .collect();

        if source_rows.is_empty() {
            return Err(CompsetError::input_data("no complete rows"));
        }
        if source_rows.len() < MIN_COMPLETE_ROWS {
            return Err(CompsetError::input_data(format!(
                "only {} complete rows, at least {} required",
                source_rows.len(),
                MIN_COMPLETE_ROWS
            )));
        }

        let mut values = Array2::<f64>::zeros((source_rows.len(), retained.len()));
        for (j, (_, column)) in retained.iter().enumerate() {
            for (i, &row) in source_rows.iter().enumerate() {
                values[[i, j]] = column[row].unwrap_or(f64::NAN);
            }
        }

        let attributes: Vec<String> = retained
            .iter()
            .map(|(idx, _)| table.columns()[*idx].clone())
            .collect();

        let floored = if self.modify_data {
            floor_transform(&values)
        } else {
            None
        };

        info!(
            "Prepared {} of {} rows across {} attributes ({} columns dropped)",
            source_rows.len(),
            n_rows,
            attributes.len(),
            dropped.len()
        );

        Ok(CleanedMatrix {
            attributes,
            values,
            source_rows,
            floored,
            dropped,
        })
    }
}

/// Raise values below their column mean to the mean.
///
/// Returns `None` when the result is not entirely finite; callers then keep
/// the untransformed data.
pub fn floor_transform(values: &Array2<f64>) -> Option<Array2<f64>> {
    let means = values.mean_axis(Axis(0))?;
    let mut out = values.clone();
    for (mut column, mean) in out.axis_iter_mut(Axis(1)).zip(means.iter()) {
        for v in column.iter_mut() {
            if *v < *mean {
                *v = *mean;
            }
        }
    }
    if out.iter().all(|v| v.is_finite()) {
        Some(out)
    } else {
        debug!("Floor transform produced non-finite values; using untransformed data");
        None
    }
}
