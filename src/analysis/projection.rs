//! Two-dimensional perceptual map via Kruskal non-metric MDS.
//!
//! Distances are Euclidean on the untransformed attribute matrix. The
//! configuration starts from classical (Torgerson) scaling and is refined
//! with SMACOF majorization steps against monotone disparities. Only the
//! rank order of the input distances matters to the final stress.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::distance::{euclidean_distance, DistanceMatrix};
use crate::core::errors::{CompsetError, Result};

/// Convergence controls for the MDS iterations.
#[derive(Debug, Clone, Copy)]
pub struct MdsParams {
    /// Maximum SMACOF iterations
    pub max_iterations: usize,
    /// Stop when stress improves by less than this
    pub tolerance: f64,
}

impl Default for MdsParams {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            tolerance: 1e-6,
        }
    }
}

/// Item index to 2D coordinates, same order as the cleaned rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// `(x, y)` per item
    pub points: Vec<(f64, f64)>,
    /// Kruskal stress-1 of the final configuration
    pub stress: f64,
    /// Iterations performed
    pub iterations: usize,
}

impl Projection {
    /// Number of projected items.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no items were projected.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Project the rows of `values` into two dimensions.
pub fn project(values: &ndarray::Array2<f64>, params: MdsParams) -> Result<Projection> {
    let dist = euclidean_distance(values)
        .map_err(|e| CompsetError::projection(format!("distance computation failed: {e}")))?;
    project_distances(&dist, params)
}

/// Non-metric MDS on a precomputed distance matrix.
pub fn project_distances(dist: &DistanceMatrix, params: MdsParams) -> Result<Projection> {
    let n = dist.len();
    if n < 3 {
        return Err(CompsetError::projection(format!(
            "need at least 3 items, got {n}"
        )));
    }
    let (_, max_d) = dist
        .range()
        .ok_or_else(|| CompsetError::projection("no pairwise distances"))?;
    if max_d <= 0.0 {
        return Err(CompsetError::projection("all pairwise distances are zero"));
    }

    let mut config = classical_scaling(dist)?;
    // tiny deterministic jitter keeps coincident starting points separable
    for i in 0..n {
        config[(i, 0)] += 1e-9 * max_d * i as f64;
        config[(i, 1)] += 1e-9 * max_d * ((i * 7) % 5) as f64;
    }

    let pairs: Vec<(usize, usize, f64)> = dist.pairs().collect();
    let mut order: Vec<usize> = (0..pairs.len()).collect();
    order.sort_by(|&a, &b| pairs[a].2.total_cmp(&pairs[b].2));

    let mut stress = f64::INFINITY;
    let mut iterations = 0;
    for iter in 0..params.max_iterations.max(1) {
        iterations = iter + 1;
        let current = config_distances(&config, &pairs);
        let disparities = monotone_disparities(&current, &order, pairs.len() as f64);
        let new_stress = kruskal_stress(&current, &disparities);
        if !new_stress.is_finite() {
            return Err(CompsetError::projection("stress became non-finite"));
        }
        let improvement = stress - new_stress;
        stress = new_stress;
        if improvement.abs() < params.tolerance || stress < 1e-12 {
            break;
        }
        config = guttman_transform(&config, &pairs, &current, &disparities);
    }

    let points: Vec<(f64, f64)> = (0..n).map(|i| (config[(i, 0)], config[(i, 1)])).collect();
    if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(CompsetError::projection("projection produced non-finite coordinates"));
    }

    info!(
        "MDS projected {} items, stress {:.4} after {} iterations",
        n, stress, iterations
    );
    Ok(Projection {
        points,
        stress,
        iterations,
    })
}

/// Torgerson scaling: top two eigenvectors of the double-centred squared distances.
fn classical_scaling(dist: &DistanceMatrix) -> Result<DMatrix<f64>> {
    let n = dist.len();
    let d2 = DMatrix::from_fn(n, n, |i, j| dist.get(i, j).powi(2));
    let row_means: Vec<f64> = (0..n).map(|i| d2.row(i).sum() / n as f64).collect();
    let grand = row_means.iter().sum::<f64>() / n as f64;
    let b = DMatrix::from_fn(n, n, |i, j| -0.5 * (d2[(i, j)] - row_means[i] - row_means[j] + grand));

    let eigen = SymmetricEigen::new(b);
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut config = DMatrix::<f64>::zeros(n, 2);
    for (dim, &e) in idx.iter().take(2).enumerate() {
        let lambda = eigen.eigenvalues[e].max(0.0);
        let scale = lambda.sqrt();
        for i in 0..n {
            // fix sign so the largest loading is positive
            config[(i, dim)] = eigen.eigenvectors[(i, e)] * scale;
        }
        let flip = (0..n)
            .map(|i| config[(i, dim)])
            .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if flip < 0.0 {
            for i in 0..n {
                config[(i, dim)] = -config[(i, dim)];
            }
        }
    }
    if config.iter().any(|v| !v.is_finite()) {
        return Err(CompsetError::projection("classical scaling produced non-finite values"));
    }
    debug!(
        "Classical scaling eigenvalues: {:?}",
        idx.iter().take(2).map(|&e| eigen.eigenvalues[e]).collect::<Vec<_>>()
    );
    Ok(config)
}

fn config_distances(config: &DMatrix<f64>, pairs: &[(usize, usize, f64)]) -> Vec<f64> {
    pairs
        .iter()
        .map(|&(i, j, _)| {
            let dx = config[(i, 0)] - config[(j, 0)];
            let dy = config[(i, 1)] - config[(j, 1)];
            (dx * dx + dy * dy).sqrt()
        })
        .collect()
}

/// Pool-adjacent-violators over distances sorted by input dissimilarity,
/// scaled so the disparities' sum of squares equals `target_ss`.
fn monotone_disparities(current: &[f64], order: &[usize], target_ss: f64) -> Vec<f64> {
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(order.len());
    for &idx in order {
        blocks.push((current[idx], 1));
        while blocks.len() > 1 {
            let (last_mean, last_n) = blocks[blocks.len() - 1];
            let (prev_mean, prev_n) = blocks[blocks.len() - 2];
            if prev_mean <= last_mean {
                break;
            }
            let merged_n = prev_n + last_n;
            let merged_mean =
                (prev_mean * prev_n as f64 + last_mean * last_n as f64) / merged_n as f64;
            blocks.pop();
            let top = blocks.len() - 1;
            blocks[top] = (merged_mean, merged_n);
        }
    }

    let mut disparities = vec![0.0; current.len()];
    let mut pos = 0;
    for (mean, count) in blocks {
        for &idx in &order[pos..pos + count] {
            disparities[idx] = mean;
        }
        pos += count;
    }

    let ss: f64 = disparities.iter().map(|d| d * d).sum();
    if ss > 0.0 {
        let scale = (target_ss / ss).sqrt();
        for d in &mut disparities {
            *d *= scale;
        }
    }
    disparities
}

/// Kruskal stress-1 with disparities rescaled to the current distances.
fn kruskal_stress(current: &[f64], disparities: &[f64]) -> f64 {
    let denom: f64 = current.iter().map(|d| d * d).sum();
    if denom <= 0.0 {
        return f64::NAN;
    }
    let cross: f64 = current.iter().zip(disparities).map(|(d, h)| d * h).sum();
    let hh: f64 = disparities.iter().map(|h| h * h).sum();
    let scale = if hh > 0.0 { cross / hh } else { 0.0 };
    let num: f64 = current
        .iter()
        .zip(disparities)
        .map(|(d, h)| (d - scale * h).powi(2))
        .sum();
    (num / denom).sqrt()
}

/// One SMACOF majorization step with unit weights.
fn guttman_transform(
    config: &DMatrix<f64>,
    pairs: &[(usize, usize, f64)],
    current: &[f64],
    disparities: &[f64],
) -> DMatrix<f64> {
    let n = config.nrows();
    let mut b = DMatrix::<f64>::zeros(n, n);
    for (k, &(i, j, _)) in pairs.iter().enumerate() {
        if current[k] > 1e-12 {
            let v = -disparities[k] / current[k];
            b[(i, j)] = v;
            b[(j, i)] = v;
        }
    }
    for i in 0..n {
        let row_sum: f64 = (0..n).filter(|&j| j != i).map(|j| b[(i, j)]).sum();
        b[(i, i)] = -row_sum;
    }
    (b * config) / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn pairwise(points: &[(f64, f64)], i: usize, j: usize) -> f64 {
        let dx = points[i].0 - points[j].0;
        let dy = points[i].1 - points[j].1;
        (dx * dx + dy * dy).sqrt()
    }

    #[test]
    fn test_projection_preserves_length_and_order() {
        let values = array![
            [1.0, 2.0, 3.0],
            [1.1, 2.1, 2.9],
            [8.0, 1.0, 0.0],
            [8.2, 0.9, 0.1],
            [4.0, 9.0, 4.0],
        ];
        let projection = project(&values, MdsParams::default()).unwrap();
        assert_eq!(projection.len(), 5);
        assert!(projection
            .points
            .iter()
            .all(|(x, y)| x.is_finite() && y.is_finite()));
        // near neighbours in attribute space stay near on the map
        assert!(pairwise(&projection.points, 0, 1) < pairwise(&projection.points, 0, 2));
        assert!(pairwise(&projection.points, 2, 3) < pairwise(&projection.points, 2, 4));
    }

    #[test]
    fn test_planar_data_has_low_stress() {
        let values = array![[0.0, 0.0], [1.0, 0.0], [0.0, 2.0], [3.0, 3.0], [5.0, 1.0]];
        let projection = project(&values, MdsParams::default()).unwrap();
        assert!(projection.stress < 0.05, "stress {}", projection.stress);
    }

    #[test]
    fn test_all_zero_distances_fail() {
        let values = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let err = project(&values, MdsParams::default()).unwrap_err();
        assert!(matches!(err, CompsetError::Projection { .. }));
    }

    #[test]
    fn test_non_finite_input_fails() {
        let values = array![[1.0, f64::NAN], [1.0, 2.0], [3.0, 1.0]];
        assert!(matches!(
            project(&values, MdsParams::default()),
            Err(CompsetError::Projection { .. })
        ));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let values = array![[1.0, 5.0], [2.0, 3.0], [9.0, 1.0], [4.0, 4.0]];
        let a = project(&values, MdsParams::default()).unwrap();
        let b = project(&values, MdsParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pava_is_monotone() {
        let current = vec![3.0, 1.0, 2.0, 5.0];
        let order = vec![0, 1, 2, 3];
        let d = monotone_disparities(&current, &order, 4.0);
        for w in order.windows(2) {
            assert!(d[w[0]] <= d[w[1]] + 1e-12);
        }
        let ss: f64 = d.iter().map(|v| v * v).sum();
        assert!((ss - 4.0).abs() < 1e-9);
    }
}
