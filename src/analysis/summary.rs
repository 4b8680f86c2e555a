//! Presentation payloads: plot points and the cluster summary table.
//!
//! The summary table is the exact table shown to users and also the table
//! embedded in the report prompt, so both go through [`SummaryTable`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::analysis::characterize::ProfileSet;
use crate::analysis::clustering::ClusterAssignment;
use crate::analysis::prepare::CleanedMatrix;
use crate::analysis::projection::Projection;
use crate::core::config::{AnalysisSettings, DisplaySettings, Language};
use crate::core::table::ObservationTable;

/// Delimiter of the serialized summary table.
pub const TABLE_DELIMITER: &str = " | ";

/// Default segment name when naming has not produced one.
pub fn default_segment_name(cluster_id: usize) -> String {
    format!("Segment {cluster_id}")
}

/// Default names for `n` clusters.
pub fn default_segment_names(n: usize) -> Vec<String> {
    (1..=n).map(default_segment_name).collect()
}

/// One projected item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub item_id: String,
    pub brand: Option<String>,
    pub x: f64,
    pub y: f64,
    pub cluster_id: usize,
    /// Item belongs to the highlighted brand
    pub highlight: bool,
}

/// Mean position of a cluster on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCenter {
    pub cluster_id: usize,
    pub x: f64,
    pub y: f64,
}

/// Everything a renderer needs to draw the perceptual map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPayload {
    pub points: Vec<PlotPoint>,
    /// Present only when centers are enabled
    pub centers: Option<Vec<ClusterCenter>>,
    pub marker_size: f64,
}

/// Build plot points from the analysis artifacts and display settings.
pub fn plot_payload(
    table: &ObservationTable,
    prepared: &CleanedMatrix,
    assignment: &ClusterAssignment,
    projection: &Projection,
    analysis: &AnalysisSettings,
    display: &DisplaySettings,
) -> PlotPayload {
    let id_col = table.column_index_ci(&analysis.id_column);
    let brand_col = table.column_index_ci(&analysis.brand_column);
    let highlight = display
        .highlight_brand
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty());

    let points: Vec<PlotPoint> = prepared
        .source_rows
        .iter()
        .zip(assignment.labels())
        .zip(&projection.points)
        .map(|((&row, &cluster_id), &(x, y))| {
            let brand = brand_col.and_then(|c| table.text(row, c));
            let item_id = id_col
                .and_then(|c| table.text(row, c))
                .unwrap_or_else(|| format!("row {}", row + 1));
            let highlight = match (highlight, brand.as_deref()) {
                (Some(target), Some(b)) => b.trim().eq_ignore_ascii_case(target),
                _ => false,
            };
            PlotPoint {
                item_id,
                brand,
                x,
                y,
                cluster_id,
                highlight,
            }
        })
        .collect();

    let centers = display
        .show_centers
        .then(|| cluster_centers(&points, assignment.n_clusters()));

    PlotPayload {
        points,
        centers,
        marker_size: display.marker_size,
    }
}

/// Mean (x, y) of each cluster's points.
pub fn cluster_centers(points: &[PlotPoint], n_clusters: usize) -> Vec<ClusterCenter> {
    (1..=n_clusters)
        .filter_map(|cluster_id| {
            let members: Vec<&PlotPoint> =
                points.iter().filter(|p| p.cluster_id == cluster_id).collect();
            if members.is_empty() {
                return None;
            }
            let n = members.len() as f64;
            Some(ClusterCenter {
                cluster_id,
                x: members.iter().map(|p| p.x).sum::<f64>() / n,
                y: members.iter().map(|p| p.y).sum::<f64>() / n,
            })
        })
        .collect()
}

/// One row of the cluster summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummaryRow {
    pub cluster_id: usize,
    pub name: String,
    /// Distinct brands in the cluster (items when no brand column exists)
    pub company_count: usize,
    pub market_share_pct: f64,
    pub total_revenue: f64,
    pub avg_revenue: f64,
    pub key_characteristics: String,
}

/// Cluster summary table with localized headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub language: Language,
    pub rows: Vec<ClusterSummaryRow>,
}

impl SummaryTable {
    /// Build the table; `names` shorter than the cluster count fall back to defaults.
    pub fn build(
        table: &ObservationTable,
        prepared: &CleanedMatrix,
        assignment: &ClusterAssignment,
        profiles: &ProfileSet,
        names: &[String],
        brand_column: &str,
        language: Language,
    ) -> Self {
        let brand_col = table.column_index_ci(brand_column);
        let grand_total = profiles.grand_total_revenue();

        let rows = profiles
            .profiles
            .iter()
            .map(|profile| {
                let members = assignment.members(profile.cluster_id);
                let company_count = match brand_col {
                    Some(col) => members
                        .iter()
                        .filter_map(|&i| table.text(prepared.source_rows[i], col))
                        .map(|b| b.trim().to_string())
                        .collect::<BTreeSet<_>>()
                        .len(),
                    None => members.len(),
                };
                let market_share_pct = if grand_total > 0.0 {
                    profile.total_revenue / grand_total * 100.0
                } else {
                    0.0
                };
                ClusterSummaryRow {
                    cluster_id: profile.cluster_id,
                    name: names
                        .get(profile.cluster_id - 1)
                        .cloned()
                        .unwrap_or_else(|| default_segment_name(profile.cluster_id)),
                    company_count,
                    market_share_pct,
                    total_revenue: profile.total_revenue,
                    avg_revenue: profile.avg_revenue,
                    key_characteristics: profile.characteristics.clone(),
                }
            })
            .collect();

        Self { language, rows }
    }

    /// Column headers in the table language.
    pub fn headers(&self) -> [&'static str; 6] {
        match self.language {
            Language::En => [
                "Segment",
                "Companies",
                "Market Share (%)",
                "Total Revenue",
                "Avg Revenue",
                "Key Characteristics",
            ],
            Language::ZhTw => ["區隔名稱", "公司數", "市佔率(%)", "總營收", "平均營收", "關鍵特徵"],
        }
    }

    /// Formatted cells of one row, in header order.
    pub fn cells(row: &ClusterSummaryRow) -> [String; 6] {
        [
            row.name.clone(),
            row.company_count.to_string(),
            format!("{:.1}", row.market_share_pct),
            format!("{:.0}", row.total_revenue),
            format!("{:.2}", row.avg_revenue),
            row.key_characteristics.clone(),
        ]
    }

    /// Serialize as a `|`-delimited text table with a header line.
    pub fn to_delimited(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(self.headers().join(TABLE_DELIMITER));
        for row in &self.rows {
            let cells = Self::cells(row).map(|c| c.replace('|', "/"));
            lines.push(cells.join(TABLE_DELIMITER));
        }
        lines.join("\n")
    }
}
