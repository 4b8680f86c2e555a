//! Per-cluster statistical characterization.
//!
//! Every retained attribute is tested cluster-vs-rest with a Welch
//! two-sample t-test. An attribute is a *strength* of a cluster only when
//! the difference is significant, the pooled-SD effect size is large enough,
//! and the cluster sits above the rest. Distinctively low attributes are
//! never reported.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, info};

use crate::analysis::clustering::ClusterAssignment;
use crate::analysis::prepare::CleanedMatrix;
use crate::core::config::{AnalysisSettings, Language};
use crate::core::table::ObservationTable;

/// Outcome of a single cluster-vs-rest comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WelchTest {
    /// Mean of the cluster group
    pub cluster_mean: f64,
    /// Mean of every other item
    pub rest_mean: f64,
    /// Welch t statistic
    pub t: f64,
    /// Welch-Satterthwaite degrees of freedom
    pub df: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Cohen's d with pooled standard deviation
    pub cohens_d: f64,
}

/// An attribute on which a cluster is distinctively strong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantAttribute {
    /// Attribute column name
    pub name: String,
    /// Test statistics behind the flag
    pub test: WelchTest,
}

/// Statistical profile of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster_id: usize,
    pub n_items: usize,
    pub total_revenue: f64,
    pub avg_revenue: f64,
    /// Strengths in attribute column order
    pub significant_attributes: Vec<SignificantAttribute>,
    /// Joined strengths, or the no-strengths sentinel
    pub characteristics: String,
    /// Weak fingerprint of `characteristics`
    pub content_hash: u32,
}

/// Profiles for every cluster of an assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub profiles: Vec<ClusterProfile>,
    /// Revenue column actually used, if any matched
    pub revenue_column: Option<String>,
    /// Weak fingerprint over the ordered characteristics of all clusters
    pub content_hash: u32,
}

impl ProfileSet {
    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether there are no clusters.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Ordered characteristics, one entry per cluster.
    pub fn characteristics(&self) -> Vec<&str> {
        self.profiles
            .iter()
            .map(|p| p.characteristics.as_str())
            .collect()
    }

    /// Sum of total revenue across clusters.
    pub fn grand_total_revenue(&self) -> f64 {
        self.profiles.iter().map(|p| p.total_revenue).sum()
    }
}

/// Label used when a cluster has no distinctive strengths.
pub fn no_strengths_sentinel(language: Language) -> &'static str {
    match language {
        Language::En => "No distinctive strengths",
        Language::ZhTw => "無顯著優勢",
    }
}

/// Sum of Unicode code points modulo 10000.
///
/// Deliberately coarse: order-insensitive within the text and collision
/// prone. The worst case is a missed re-naming, never a wrong result.
pub fn weak_content_hash(text: &str) -> u32 {
    let sum: u64 = text.chars().map(|c| c as u64).sum();
    (sum % 10_000) as u32
}

/// Welch two-sample t-test with Cohen's d.
///
/// Returns `None` when either group has fewer than two values or the test
/// is undefined (zero standard error or zero pooled variance).
pub fn welch_test(cluster: &[f64], rest: &[f64]) -> Option<WelchTest> {
    let (n1, n2) = (cluster.len(), rest.len());
    if n1 < 2 || n2 < 2 {
        return None;
    }
    let (m1, v1) = mean_and_variance(cluster);
    let (m2, v2) = mean_and_variance(rest);
    let (n1f, n2f) = (n1 as f64, n2 as f64);

    let a = v1 / n1f;
    let b = v2 / n2f;
    let se = (a + b).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return None;
    }
    let t = (m1 - m2) / se;
    let df = (a + b).powi(2) / (a.powi(2) / (n1f - 1.0) + b.powi(2) / (n2f - 1.0));
    if !df.is_finite() || df <= 0.0 {
        return None;
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);

    let pooled = (((n1f - 1.0) * v1 + (n2f - 1.0) * v2) / (n1f + n2f - 2.0)).sqrt();
    if !pooled.is_finite() || pooled <= 0.0 {
        return None;
    }

    Some(WelchTest {
        cluster_mean: m1,
        rest_mean: m2,
        t,
        df,
        p_value,
        cohens_d: (m1 - m2) / pooled,
    })
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Computes cluster profiles from a cleaned matrix and its assignment.
#[derive(Debug, Clone)]
pub struct ClusterCharacterizer {
    significance_threshold: f64,
    effect_size_threshold: f64,
    revenue_candidates: Vec<String>,
    language: Language,
}

impl ClusterCharacterizer {
    pub fn new(settings: &AnalysisSettings, language: Language) -> Self {
        Self {
            significance_threshold: settings.significance_threshold,
            effect_size_threshold: settings.effect_size_threshold,
            revenue_candidates: settings.revenue_candidates.clone(),
            language,
        }
    }

    /// First revenue candidate present in the table, matched case-insensitively.
    pub fn resolve_revenue_column(&self, table: &ObservationTable) -> Option<usize> {
        self.revenue_candidates
            .iter()
            .find_map(|candidate| table.column_index_ci(candidate))
    }

    /// Whether a test result counts as a strength.
    pub fn is_strength(&self, test: &WelchTest) -> bool {
        test.p_value < self.significance_threshold
            && test.cohens_d > self.effect_size_threshold
            && test.cluster_mean > test.rest_mean
    }

    /// Profile every cluster.
    ///
    /// Attribute tests use the untransformed values even when the floor
    /// transform drove clustering.
    pub fn characterize(
        &self,
        table: &ObservationTable,
        prepared: &CleanedMatrix,
        assignment: &ClusterAssignment,
    ) -> ProfileSet {
        let revenue_idx = self.resolve_revenue_column(table);
        let revenue: Vec<f64> = match revenue_idx {
            Some(col) => {
                let column = table.numeric_column(col);
                prepared
                    .source_rows
                    .iter()
                    .map(|&row| column[row].unwrap_or(0.0))
                    .collect()
            }
            None => {
                debug!("No revenue column found; revenue metrics default to 0");
                vec![0.0; prepared.n_rows()]
            }
        };

        let labels = assignment.labels();
        let mut profiles = Vec::with_capacity(assignment.n_clusters());
        for cluster_id in assignment.cluster_ids() {
            let members = assignment.members(cluster_id);
            let n_items = members.len();
            let total_revenue: f64 = members.iter().map(|&i| revenue[i]).sum();
            let avg_revenue = if n_items > 0 {
                total_revenue / n_items as f64
            } else {
                0.0
            };

            let mut significant_attributes = Vec::new();
            for (j, name) in prepared.attributes.iter().enumerate() {
                let column = prepared.values.column(j);
                let (inside, outside): (Vec<(usize, f64)>, Vec<(usize, f64)>) = column
                    .iter()
                    .copied()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .partition(|(i, _)| labels[*i] == cluster_id);
                let inside: Vec<f64> = inside.into_iter().map(|(_, v)| v).collect();
                let outside: Vec<f64> = outside.into_iter().map(|(_, v)| v).collect();

                if let Some(test) = welch_test(&inside, &outside) {
                    if self.is_strength(&test) {
                        significant_attributes.push(SignificantAttribute {
                            name: name.clone(),
                            test,
                        });
                    }
                }
            }

            let characteristics = if significant_attributes.is_empty() {
                no_strengths_sentinel(self.language).to_string()
            } else {
                significant_attributes
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            debug!(
                "Cluster {} ({} items): {} significant attributes",
                cluster_id,
                n_items,
                significant_attributes.len()
            );

            profiles.push(ClusterProfile {
                cluster_id,
                n_items,
                total_revenue,
                avg_revenue,
                significant_attributes,
                content_hash: weak_content_hash(&characteristics),
                characteristics,
            });
        }

        let joined = profiles
            .iter()
            .map(|p| p.characteristics.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let content_hash = weak_content_hash(&joined);
        info!(
            "Characterized {} clusters (content hash {})",
            profiles.len(),
            content_hash
        );

        ProfileSet {
            profiles,
            revenue_column: revenue_idx.map(|i| table.columns()[i].clone()),
            content_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::Cell;
    use ndarray::Array2;

    /// Two groups of ten; `high` gets `offset` added on the first attribute.
    fn fixture(offset: f64) -> (ObservationTable, CleanedMatrix, ClusterAssignment) {
        let noise = [-2.0, -1.5, -1.0, -0.5, 0.0, 0.0, 0.5, 1.0, 1.5, 2.0];
        let mut table = ObservationTable::new(vec![
            "product_id".into(),
            "grip".into(),
            "weight".into(),
            "Sales".into(),
        ])
        .unwrap();
        let mut values = Array2::<f64>::zeros((20, 2));
        let mut groups = Vec::new();
        for i in 0..20 {
            let in_high = i < 10;
            let grip = if in_high { 10.0 + offset } else { 10.0 } + noise[i % 10];
            let weight = 5.0 + noise[(i * 3) % 10];
            values[[i, 0]] = grip;
            values[[i, 1]] = weight;
            groups.push(if in_high { 0 } else { 1 });
            table
                .push_row(vec![
                    Cell::Text(format!("p{i}")),
                    Cell::Number(grip),
                    Cell::Number(weight),
                    if i == 0 {
                        Cell::Missing
                    } else {
                        Cell::Number(100.0)
                    },
                ])
                .unwrap();
        }
        let prepared = CleanedMatrix {
            attributes: vec!["grip".into(), "weight".into()],
            values,
            source_rows: (0..20).collect(),
            floored: None,
            dropped: Vec::new(),
        };
        (table, prepared, ClusterAssignment::from_groups(&groups))
    }

    fn characterizer(language: Language) -> ClusterCharacterizer {
        ClusterCharacterizer::new(&AnalysisSettings::default(), language)
    }

    #[test]
    fn test_high_cluster_is_flagged() {
        let (table, prepared, assignment) = fixture(90.0);
        let set = characterizer(Language::En).characterize(&table, &prepared, &assignment);

        assert_eq!(set.len(), 2);
        let high = &set.profiles[0];
        assert_eq!(high.cluster_id, 1);
        assert_eq!(high.significant_attributes.len(), 1);
        assert_eq!(high.significant_attributes[0].name, "grip");
        assert_eq!(high.characteristics, "grip");
        let test = high.significant_attributes[0].test;
        assert!(test.p_value < 0.05);
        assert!(test.cohens_d > 0.5);

        // the low cluster is never flagged as distinctively low
        assert!(set.profiles[1].significant_attributes.is_empty());
        assert_eq!(set.profiles[1].characteristics, "No distinctive strengths");
    }

    #[test]
    fn test_identical_clusters_are_not_flagged() {
        let (table, prepared, assignment) = fixture(0.0);
        let set = characterizer(Language::ZhTw).characterize(&table, &prepared, &assignment);
        for profile in &set.profiles {
            assert!(profile.significant_attributes.is_empty());
            assert_eq!(profile.characteristics, "無顯著優勢");
        }
    }

    #[test]
    fn test_revenue_resolution_and_defaults() {
        let (table, prepared, assignment) = fixture(90.0);
        let set = characterizer(Language::En).characterize(&table, &prepared, &assignment);

        assert_eq!(set.revenue_column.as_deref(), Some("Sales"));
        // row 0 has missing revenue, counted as 0
        assert_eq!(set.profiles[0].total_revenue, 900.0);
        assert_eq!(set.profiles[0].avg_revenue, 90.0);
        assert_eq!(set.profiles[1].total_revenue, 1000.0);
        assert_eq!(set.grand_total_revenue(), 1900.0);
    }

    #[test]
    fn test_missing_revenue_column_defaults_to_zero() {
        let (_, prepared, assignment) = fixture(90.0);
        let mut table = ObservationTable::new(vec!["grip".into()]).unwrap();
        for _ in 0..20 {
            table.push_row(vec![Cell::Number(1.0)]).unwrap();
        }
        let set = characterizer(Language::En).characterize(&table, &prepared, &assignment);
        assert!(set.revenue_column.is_none());
        assert!(set.profiles.iter().all(|p| p.total_revenue == 0.0));
        assert!(set.profiles.iter().all(|p| p.avg_revenue == 0.0));
    }

    #[test]
    fn test_welch_skips_small_or_constant_groups() {
        assert!(welch_test(&[1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(welch_test(&[2.0, 2.0], &[2.0, 2.0, 2.0]).is_none());
        let test = welch_test(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((test.p_value - 1.0).abs() < 1e-12);
        assert_eq!(test.cohens_d, 0.0);
    }

    #[test]
    fn test_weak_hash_is_order_insensitive() {
        assert_eq!(weak_content_hash("ab"), weak_content_hash("ba"));
        assert_eq!(weak_content_hash("a"), 97);
        assert!(weak_content_hash("無顯著優勢") < 10_000);
    }
}
