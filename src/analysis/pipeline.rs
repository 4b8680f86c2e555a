//! Synchronous analysis pipeline.
//!
//! Stages run in a fixed order: prepare, then clustering and projection on
//! the same cleaned rows (in parallel), then characterization. Only after
//! `run` returns is the profile set visible to the async stages.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::characterize::{ClusterCharacterizer, ProfileSet};
use crate::analysis::clustering::{cluster_items, ClusteringOutcome};
use crate::analysis::prepare::{CleanedMatrix, DataPreparer};
use crate::analysis::projection::{project, MdsParams, Projection};
use crate::core::config::{AnalysisSettings, Language};
use crate::core::errors::{CompsetError, Result};
use crate::core::table::ObservationTable;

/// User-visible state of the synchronous pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    Loading,
    Computing,
    Ready,
    /// Rendered status message, already prefixed with `error: `
    Error(String),
}

impl PipelineStatus {
    /// Status for a failed run.
    pub fn from_error(err: &CompsetError) -> Self {
        Self::Error(err.status_message())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("loading"),
            Self::Computing => f.write_str("computing"),
            Self::Ready => f.write_str("ready"),
            Self::Error(message) => f.write_str(message),
        }
    }
}

/// Every artifact of one successful run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub table: Arc<ObservationTable>,
    pub prepared: CleanedMatrix,
    pub clustering: ClusteringOutcome,
    pub projection: Projection,
    pub profiles: ProfileSet,
    pub computed_at: DateTime<Utc>,
}

impl AnalysisOutcome {
    /// Number of analysed items.
    pub fn n_items(&self) -> usize {
        self.prepared.n_rows()
    }

    /// Number of clusters.
    pub fn n_clusters(&self) -> usize {
        self.clustering.assignment.n_clusters()
    }
}

/// Runs the synchronous stages for one table.
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    settings: AnalysisSettings,
    language: Language,
}

impl AnalysisPipeline {
    pub fn new(settings: AnalysisSettings, language: Language) -> Self {
        Self { settings, language }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Run every stage; terminal errors come back as `Err`.
    pub fn run(&self, table: Arc<ObservationTable>) -> Result<AnalysisOutcome> {
        let started = Instant::now();
        let prepared = DataPreparer::new(&self.settings).prepare(&table)?;

        let mds = MdsParams {
            max_iterations: self.settings.mds_max_iterations,
            tolerance: self.settings.mds_tolerance,
        };
        let (clustering, projection) = rayon::join(
            || cluster_items(&prepared, &self.settings),
            || project(&prepared.values, mds),
        );
        let projection = projection.map_err(|e| {
            warn!("Projection failed: {e}");
            e
        })?;

        if projection.len() != clustering.assignment.len() {
            return Err(CompsetError::internal(format!(
                "projection has {} items but assignment has {}",
                projection.len(),
                clustering.assignment.len()
            )));
        }

        let profiles = ClusterCharacterizer::new(&self.settings, self.language).characterize(
            &table,
            &prepared,
            &clustering.assignment,
        );

        info!(
            "Analysis complete: {} items, {} clusters via {:?} in {:?}",
            prepared.n_rows(),
            clustering.assignment.n_clusters(),
            clustering.method,
            started.elapsed()
        );

        Ok(AnalysisOutcome {
            table,
            prepared,
            clustering,
            projection,
            profiles,
            computed_at: Utc::now(),
        })
    }
}
