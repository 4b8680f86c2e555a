//! Similarity clustering with a total fallback chain.
//!
//! The primary method is complete-linkage hierarchical clustering on
//! correlation distance, cut at the midpoint between the smallest and
//! largest pairwise distance. The cut height is a fixed heuristic, not a
//! fitted parameter. When it fails, seeded k-means runs on the raw
//! attribute matrix, and when that fails too every item lands in one
//! cluster. [`cluster_items`] never returns an error.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::analysis::distance::{correlation_distance, DistanceMatrix};
use crate::analysis::prepare::CleanedMatrix;
use crate::core::config::AnalysisSettings;
use crate::core::errors::{CompsetError, Result};

/// Item index to 1-based dense cluster id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
}

impl ClusterAssignment {
    /// Relabel arbitrary group keys densely from 1 in order of first appearance.
    pub fn from_groups(groups: &[usize]) -> Self {
        let mut mapping: Vec<(usize, usize)> = Vec::new();
        let labels = groups
            .iter()
            .map(|g| match mapping.iter().find(|(key, _)| key == g) {
                Some((_, id)) => *id,
                None => {
                    let id = mapping.len() + 1;
                    mapping.push((*g, id));
                    id
                }
            })
            .collect();
        Self { labels }
    }

    /// Every item in cluster 1.
    pub fn single(n: usize) -> Self {
        Self { labels: vec![1; n] }
    }

    /// Cluster id of each item.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no items.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of distinct clusters.
    pub fn n_clusters(&self) -> usize {
        self.labels.iter().copied().max().unwrap_or(0)
    }

    /// Cluster ids `1..=n_clusters`.
    pub fn cluster_ids(&self) -> impl Iterator<Item = usize> {
        1..=self.n_clusters()
    }

    /// Item indices belonging to `cluster_id`.
    pub fn members(&self, cluster_id: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == cluster_id)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Which link of the fallback chain produced the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringMethod {
    /// Complete-linkage hierarchical clustering at the heuristic height
    Hierarchical,
    /// Seeded k-means
    KMeans,
    /// Everything in one cluster
    SingleCluster,
}

/// Result of the clustering stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOutcome {
    /// Cluster per item
    pub assignment: ClusterAssignment,
    /// Method that succeeded
    pub method: ClusteringMethod,
    /// Cut height, when hierarchical clustering succeeded
    pub cut_height: Option<f64>,
    /// Reasons earlier methods were skipped
    pub fallback_reasons: Vec<String>,
}

/// Midpoint between the minimum and maximum pairwise distance.
pub fn heuristic_cut_height(dist: &DistanceMatrix) -> Result<f64> {
    let (lo, hi) = dist
        .range()
        .ok_or_else(|| CompsetError::clustering("hierarchical", "fewer than two items"))?;
    let height = (lo + hi) / 2.0;
    if !height.is_finite() {
        return Err(CompsetError::clustering(
            "hierarchical",
            format!("invalid cut height {height}"),
        ));
    }
    if hi - lo <= 1e-12 * hi.abs().max(1.0) {
        return Err(CompsetError::clustering(
            "hierarchical",
            "all pairwise distances are equal",
        ));
    }
    Ok(height)
}

/// Complete-linkage agglomeration cut at `height`.
///
/// Merging stops once the closest pair of clusters is farther apart than
/// `height`; with complete linkage merge heights are monotone, so this is
/// the same as cutting the dendrogram.
pub fn hierarchical_complete(dist: &DistanceMatrix, height: f64) -> Result<ClusterAssignment> {
    let n = dist.len();
    if n < 2 {
        return Err(CompsetError::clustering("hierarchical", "fewer than two items"));
    }
    if !height.is_finite() || height < 0.0 {
        return Err(CompsetError::clustering(
            "hierarchical",
            format!("invalid cut height {height}"),
        ));
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut linkage = dist.view().to_owned();

    loop {
        if clusters.len() == 1 {
            break;
        }
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let d = linkage[[a, b]];
                if best.map_or(true, |(_, _, bd)| d < bd) {
                    best = Some((a, b, d));
                }
            }
        }
        let Some((a, b, d)) = best else { break };
        if d > height {
            break;
        }

        // complete linkage: merged distance is the max of the two
        let moved = clusters.remove(b);
        clusters[a].extend(moved);
        let size = linkage.nrows();
        let mut next = Array2::<f64>::zeros((size - 1, size - 1));
        let keep: Vec<usize> = (0..size).filter(|&k| k != b).collect();
        for (ni, &oi) in keep.iter().enumerate() {
            for (nj, &oj) in keep.iter().enumerate() {
                next[[ni, nj]] = if ni == nj {
                    0.0
                } else if oi == a {
                    linkage[[a, oj]].max(linkage[[b, oj]])
                } else if oj == a {
                    linkage[[oi, a]].max(linkage[[oi, b]])
                } else {
                    linkage[[oi, oj]]
                };
            }
        }
        linkage = next;
    }

    let mut groups = vec![0usize; n];
    for (gid, members) in clusters.iter().enumerate() {
        for &m in members {
            groups[m] = gid;
        }
    }
    let assignment = ClusterAssignment::from_groups(&groups);

    if assignment.len() != n {
        return Err(CompsetError::clustering(
            "hierarchical",
            format!("assigned {} of {n} items", assignment.len()),
        ));
    }
    if assignment.n_clusters() == n {
        return Err(CompsetError::clustering(
            "hierarchical",
            "cut left every item in its own cluster",
        ));
    }
    Ok(assignment)
}

/// Parameters for seeded k-means.
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    /// Number of clusters
    pub k: usize,
    /// Independent restarts; the lowest within-cluster sum of squares wins
    pub restarts: usize,
    /// Lloyd iterations per restart
    pub max_iterations: usize,
    /// Seed for centroid selection
    pub seed: u64,
}

/// Seeded Lloyd k-means on the rows of `values`.
pub fn kmeans(values: &Array2<f64>, params: KMeansParams) -> Result<ClusterAssignment> {
    let (n, p) = values.dim();
    let k = params.k;
    if k == 0 || k > n {
        return Err(CompsetError::clustering(
            "kmeans",
            format!("k = {k} invalid for {n} items"),
        ));
    }
    if p == 0 || values.iter().any(|v| !v.is_finite()) {
        return Err(CompsetError::clustering("kmeans", "matrix is empty or non-finite"));
    }
    let distinct = count_distinct_rows(values);
    if distinct < k {
        return Err(CompsetError::clustering(
            "kmeans",
            format!("only {distinct} distinct items for k = {k}"),
        ));
    }

    let mut best: Option<(f64, Vec<usize>)> = None;
    for restart in 0..params.restarts.max(1) {
        let seeds = seed_indices(values, k, params.seed, restart as u64);
        let (labels, wss) = lloyd(values, &seeds, params.max_iterations);
        if best.as_ref().map_or(true, |(bw, _)| wss < *bw - 1e-12) {
            best = Some((wss, labels));
        }
    }

    let (wss, labels) =
        best.ok_or_else(|| CompsetError::clustering("kmeans", "no restart completed"))?;
    if !wss.is_finite() {
        return Err(CompsetError::clustering("kmeans", "non-finite within-cluster sum"));
    }
    let assignment = ClusterAssignment::from_groups(&labels);
    if assignment.n_clusters() != k {
        return Err(CompsetError::clustering(
            "kmeans",
            format!("produced {} clusters, expected {k}", assignment.n_clusters()),
        ));
    }
    Ok(assignment)
}

fn count_distinct_rows(values: &Array2<f64>) -> usize {
    let mut seen: Vec<usize> = Vec::new();
    for i in 0..values.nrows() {
        if !seen.iter().any(|&j| values.row(i) == values.row(j)) {
            seen.push(i);
        }
    }
    seen.len()
}

/// Pick `k` rows with distinct values.
///
/// The first restart spreads seeds by farthest-point selection; later
/// restarts take rows in seeded hash order.
fn seed_indices(values: &Array2<f64>, k: usize, seed: u64, restart: u64) -> Vec<usize> {
    let mut order: Vec<(u64, usize)> = (0..values.nrows())
        .map(|i| {
            let key = [restart.to_le_bytes(), (i as u64).to_le_bytes()].concat();
            (xxh3_64_with_seed(&key, seed), i)
        })
        .collect();
    order.sort_unstable();

    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    if restart == 0 {
        chosen.push(order[0].1);
        while chosen.len() < k {
            let next = order
                .iter()
                .map(|&(_, i)| {
                    let nearest = chosen
                        .iter()
                        .map(|&c| squared_distance(values, i, &values.row(c).to_vec()))
                        .fold(f64::INFINITY, f64::min);
                    (nearest, i)
                })
                .filter(|(d, _)| *d > 0.0)
                .fold(None, |best: Option<(f64, usize)>, cand| match best {
                    Some(b) if b.0 >= cand.0 => Some(b),
                    _ => Some(cand),
                });
            match next {
                Some((_, i)) => chosen.push(i),
                None => break,
            }
        }
        return chosen;
    }

    for (_, i) in order {
        if chosen.iter().all(|&c| values.row(c) != values.row(i)) {
            chosen.push(i);
            if chosen.len() == k {
                break;
            }
        }
    }
    chosen
}

fn squared_distance(values: &Array2<f64>, row: usize, centroid: &[f64]) -> f64 {
    values
        .row(row)
        .iter()
        .zip(centroid)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

fn lloyd(values: &Array2<f64>, seeds: &[usize], max_iterations: usize) -> (Vec<usize>, f64) {
    let (n, p) = values.dim();
    let k = seeds.len();
    let mut centroids: Vec<Vec<f64>> = seeds.iter().map(|&s| values.row(s).to_vec()).collect();
    let mut labels = vec![usize::MAX; n];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for i in 0..n {
            let mut best_c = 0;
            let mut best_d = f64::INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let d = squared_distance(values, i, centroid);
                if d < best_d {
                    best_d = d;
                    best_c = c;
                }
            }
            if labels[i] != best_c {
                labels[i] = best_c;
                changed = true;
            }
        }

        let mut sums = vec![vec![0.0; p]; k];
        let mut counts = vec![0usize; k];
        for i in 0..n {
            counts[labels[i]] += 1;
            for (s, v) in sums[labels[i]].iter_mut().zip(values.row(i).iter()) {
                *s += v;
            }
        }
        for c in 0..k {
            if counts[c] > 0 {
                centroids[c] = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            }
            // empty clusters keep their previous centroid
        }

        if !changed {
            break;
        }
    }

    let wss = (0..n)
        .map(|i| squared_distance(values, i, &centroids[labels[i]]))
        .sum();
    (labels, wss)
}

/// Run the fallback chain: hierarchical, then k-means, then one cluster.
pub fn cluster_items(prepared: &CleanedMatrix, settings: &AnalysisSettings) -> ClusteringOutcome {
    let values = prepared.similarity_values();
    let n = values.nrows();
    let mut fallback_reasons = Vec::new();

    let hierarchical = correlation_distance(values).and_then(|dist| {
        let height = heuristic_cut_height(&dist)?;
        hierarchical_complete(&dist, height).map(|a| (a, height))
    });
    match hierarchical {
        Ok((assignment, height)) => {
            info!(
                "Hierarchical clustering produced {} clusters at height {:.4}",
                assignment.n_clusters(),
                height
            );
            return ClusteringOutcome {
                assignment,
                method: ClusteringMethod::Hierarchical,
                cut_height: Some(height),
                fallback_reasons,
            };
        }
        Err(e) => {
            warn!("Hierarchical clustering failed, falling back to k-means: {e}");
            fallback_reasons.push(e.to_string());
        }
    }

    let params = KMeansParams {
        k: 3.min(n.saturating_sub(1)),
        restarts: settings.kmeans_restarts,
        max_iterations: settings.kmeans_max_iterations,
        seed: settings.kmeans_seed,
    };
    match kmeans(values, params) {
        Ok(assignment) => {
            info!("k-means produced {} clusters", assignment.n_clusters());
            ClusteringOutcome {
                assignment,
                method: ClusteringMethod::KMeans,
                cut_height: None,
                fallback_reasons,
            }
        }
        Err(e) => {
            warn!("k-means failed, using a single cluster: {e}");
            fallback_reasons.push(e.to_string());
            debug!("Single cluster over {n} items");
            ClusteringOutcome {
                assignment: ClusterAssignment::single(n),
                method: ClusteringMethod::SingleCluster,
                cut_height: None,
                fallback_reasons,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::distance::euclidean_distance;
    use ndarray::array;
    use proptest::prelude::*;

    fn prepared(values: Array2<f64>) -> CleanedMatrix {
        let n = values.nrows();
        let p = values.ncols();
        CleanedMatrix {
            attributes: (0..p).map(|j| format!("a{j}")).collect(),
            values,
            source_rows: (0..n).collect(),
            floored: None,
            dropped: Vec::new(),
        }
    }

    #[test]
    fn test_from_groups_is_dense_in_first_appearance_order() {
        let a = ClusterAssignment::from_groups(&[7, 7, 2, 9, 2]);
        assert_eq!(a.labels(), &[1, 1, 2, 3, 2]);
        assert_eq!(a.n_clusters(), 3);
        assert_eq!(a.members(2), vec![2, 4]);
    }

    #[test]
    fn test_hierarchical_two_groups() {
        let values = array![[0.0, 0.0], [0.0, 1.0], [10.0, 10.0], [10.0, 11.0]];
        let dist = euclidean_distance(&values).unwrap();
        let height = heuristic_cut_height(&dist).unwrap();
        let assignment = hierarchical_complete(&dist, height).unwrap();
        assert_eq!(assignment.labels(), &[1, 1, 2, 2]);
    }

    #[test]
    fn test_equal_distances_fail_heuristic() {
        let values = array![[0.0, 0.0], [1.0, 0.0], [0.5, 0.75f64.sqrt()]];
        let dist = euclidean_distance(&values).unwrap();
        assert!(heuristic_cut_height(&dist).is_err());
    }

    #[test]
    fn test_kmeans_separates_obvious_groups() {
        let values = array![[0.0, 0.0], [0.1, 0.0], [5.0, 5.0], [5.1, 5.0], [9.0, 0.0], [9.1, 0.1]];
        let params = KMeansParams {
            k: 3,
            restarts: 10,
            max_iterations: 50,
            seed: 42,
        };
        let a = kmeans(&values, params).unwrap();
        assert_eq!(a.n_clusters(), 3);
        assert_eq!(a.labels()[0], a.labels()[1]);
        assert_eq!(a.labels()[2], a.labels()[3]);
        assert_eq!(a.labels()[4], a.labels()[5]);
        assert_ne!(a.labels()[0], a.labels()[2]);
    }

    #[test]
    fn test_kmeans_rejects_identical_rows() {
        let values = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let params = KMeansParams {
            k: 2,
            restarts: 5,
            max_iterations: 10,
            seed: 1,
        };
        assert!(kmeans(&values, params).is_err());
    }

    #[test]
    fn test_constant_rows_fall_back_to_kmeans() {
        // rows 0 and 1 have zero variance, so correlation is undefined
        let values = array![[1.0, 1.0], [2.0, 2.0], [1.0, 5.0], [9.0, 1.0]];
        let outcome = cluster_items(&prepared(values), &AnalysisSettings::default());
        assert_eq!(outcome.method, ClusteringMethod::KMeans);
        assert_eq!(outcome.assignment.len(), 4);
        assert_eq!(outcome.assignment.n_clusters(), 3);
        assert_eq!(outcome.fallback_reasons.len(), 1);
    }

    #[test]
    fn test_identical_rows_fall_back_to_single_cluster() {
        let values = array![[3.0, 3.0], [3.0, 3.0], [3.0, 3.0]];
        let outcome = cluster_items(&prepared(values), &AnalysisSettings::default());
        assert_eq!(outcome.method, ClusteringMethod::SingleCluster);
        assert_eq!(outcome.assignment.labels(), &[1, 1, 1]);
        assert_eq!(outcome.fallback_reasons.len(), 2);
    }

    #[test]
    fn test_profiles_cluster_by_shape() {
        let values = array![
            [1.0, 2.0, 3.0, 4.0],
            [10.0, 20.0, 30.0, 41.0],
            [2.0, 4.0, 6.0, 7.5],
            [4.0, 3.0, 2.0, 1.0],
            [40.0, 30.0, 21.0, 10.0],
        ];
        let outcome = cluster_items(&prepared(values), &AnalysisSettings::default());
        assert_eq!(outcome.method, ClusteringMethod::Hierarchical);
        let labels = outcome.assignment.labels();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_clustering_is_deterministic() {
        let values = array![[1.0, 1.0], [2.0, 2.0], [1.0, 5.0], [9.0, 1.0], [4.0, 4.0]];
        let settings = AnalysisSettings::default();
        let first = cluster_items(&prepared(values.clone()), &settings);
        let second = cluster_items(&prepared(values), &settings);
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_fallback_chain_is_total(
            rows in 3usize..12,
            cols in 1usize..5,
            seed in proptest::collection::vec(-50.0f64..50.0, 60),
            constant in any::<bool>(),
        ) {
            let values = Array2::from_shape_fn((rows, cols), |(i, j)| {
                if constant { 1.0 } else { seed[(i * cols + j) % seed.len()].round() }
            });
            let outcome = cluster_items(&prepared(values), &AnalysisSettings::default());
            prop_assert_eq!(outcome.assignment.len(), rows);
            let k = outcome.assignment.n_clusters();
            prop_assert!(k >= 1 && k <= rows);
            for id in outcome.assignment.cluster_ids() {
                prop_assert!(!outcome.assignment.members(id).is_empty());
            }
        }
    }
}
