//! # compset-rs: Competitive Set Analysis Engine
//!
//! Turns a table of competing items (attributes, optional revenue) into:
//!
//! - **Perceptual map**: non-metric MDS of the items into two dimensions
//! - **Segments**: correlation-distance hierarchical clustering with a total
//!   fallback chain (k-means, then a single segment)
//! - **Characterization**: Welch t-test and Cohen's d per segment and attribute
//! - **Names and report**: asynchronously generated by an external
//!   text-generation service, coordinated by single-flight task handles
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     AnalysisContext                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  DataSource  │  Analysis (sync)   │  Tasks (async)  │ Service│
//! │              │                    │                 │        │
//! │ • JSON       │ • Prepare          │ • Single-flight │ • Chat │
//! │ • CSV        │ • Cluster / MDS    │ • Naming        │ • Parse│
//! │ • Memory     │ • Characterize     │ • Report        │        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use compset_rs::{AnalysisContext, CompsetConfig, DisabledService, JsonFileSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let context = AnalysisContext::new(
//!         CompsetConfig::default(),
//!         Arc::new(JsonFileSource::new("items.json")),
//!         Arc::new(DisabledService::new("offline")),
//!         Vec::new(),
//!     )?;
//!
//!     println!("{}", context.refresh());
//!     let report = context.settled().await;
//!     println!("{}", report.text);
//!     Ok(())
//! }
//! ```

#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error taxonomy, configuration and raw tables
pub mod core {
    //! Errors, configuration and the raw observation table.

    pub mod config;
    pub mod errors;
    pub mod table;
}

// Synchronous statistical stages
pub mod analysis;

// External text-generation service
pub mod service;

// Async naming and report stages
pub mod tasks;

// Publisher/subscriber wiring and data sources
pub mod context;

// Re-export primary types for convenience
pub use analysis::{AnalysisOutcome, AnalysisPipeline, PipelineStatus, SummaryTable};
pub use context::{AnalysisContext, CsvFileSource, DataSource, InMemorySource, JsonFileSource};
pub use core::config::{CompsetConfig, Language};
pub use core::errors::{CompsetError, Result, ResultExt};
pub use core::table::{Cell, ObservationTable};
pub use service::{DisabledService, GenerationRequest, OpenAiChatService, TextGenerationService};
pub use tasks::{Report, ReportState, TaskStatus};
