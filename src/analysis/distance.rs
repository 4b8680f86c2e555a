//! Item-by-item distance matrices.
//!
//! Similarity clustering uses correlation distance (`1 - r`) so that items
//! with the same attribute *profile* group together regardless of level.
//! The perceptual map uses plain Euclidean distance on the untransformed
//! values so it reflects true magnitudes.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::core::errors::{CompsetError, Result};

/// Square, symmetric, non-negative distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    values: Array2<f64>,
}

impl DistanceMatrix {
    /// Validate and wrap a raw matrix.
    pub fn new(values: Array2<f64>) -> Result<Self> {
        let (rows, cols) = values.dim();
        if rows == 0 || cols == 0 {
            return Err(CompsetError::distance_matrix("empty distance matrix"));
        }
        if rows != cols {
            return Err(CompsetError::distance_matrix(format!(
                "distance matrix is {rows}x{cols}, expected square"
            )));
        }
        if let Some(((i, j), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(CompsetError::distance_matrix(format!(
                "non-finite distance between items {i} and {j}"
            )));
        }
        if values.iter().any(|v| *v < 0.0) {
            return Err(CompsetError::distance_matrix("negative distance"));
        }
        for i in 0..rows {
            for j in (i + 1)..rows {
                if (values[[i, j]] - values[[j, i]]).abs() > 1e-9 {
                    return Err(CompsetError::distance_matrix(format!(
                        "asymmetric distance between items {i} and {j}"
                    )));
                }
            }
        }
        Ok(Self { values })
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    /// Whether the matrix has no items.
    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    /// Distance between items `i` and `j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    /// Raw matrix view.
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    /// Off-diagonal distances in row-major upper-triangle order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.len();
        (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j, self.values[[i, j]])))
    }

    /// Minimum and maximum off-diagonal distance.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.pairs().fold(None, |acc, (_, _, d)| match acc {
            None => Some((d, d)),
            Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
        })
    }
}

/// Pearson correlation on pairwise-complete (finite) values.
pub fn pearson(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in &pairs {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return f64::NAN;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Correlation distance `1 - r` between rows (items).
pub fn correlation_distance(values: &Array2<f64>) -> Result<DistanceMatrix> {
    let (n, p) = values.dim();
    if n == 0 || p == 0 {
        return Err(CompsetError::distance_matrix(format!(
            "cannot correlate a {n}x{p} matrix"
        )));
    }
    let mut out = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let r = pearson(values.row(i), values.row(j));
            // clamp rounding drift outside [-1, 1]
            let d = (1.0 - r).clamp(0.0, 2.0);
            out[[i, j]] = d;
            out[[j, i]] = d;
        }
    }
    // NaN survives clamp, so validation still rejects zero-variance rows
    DistanceMatrix::new(out)
}

/// Euclidean distance between rows (items).
pub fn euclidean_distance(values: &Array2<f64>) -> Result<DistanceMatrix> {
    let n = values.nrows();
    let mut out = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = values
                .row(i)
                .iter()
                .zip(values.row(j).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            out[[i, j]] = d;
            out[[j, i]] = d;
        }
    }
    DistanceMatrix::new(out)
}
