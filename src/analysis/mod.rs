//! Synchronous statistical stages of a competitive set analysis.
//!
//! Data flows strictly from [`prepare`] into [`clustering`] and
//! [`projection`] (same cleaned rows), then into [`characterize`].
//! [`summary`] turns the artifacts into presentation payloads and
//! [`pipeline`] runs the stages in order.

pub mod characterize;
pub mod clustering;
pub mod distance;
pub mod pipeline;
pub mod prepare;
pub mod projection;
pub mod summary;

pub use characterize::{ClusterCharacterizer, ClusterProfile, ProfileSet};
pub use clustering::{ClusterAssignment, ClusteringMethod, ClusteringOutcome};
pub use pipeline::{AnalysisOutcome, AnalysisPipeline, PipelineStatus};
pub use prepare::{CleanedMatrix, DataPreparer};
pub use projection::Projection;
pub use summary::{ClusterSummaryRow, PlotPayload, PlotPoint, SummaryTable};
