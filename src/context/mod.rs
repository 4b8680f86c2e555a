//! Analysis context: the explicit publisher/subscriber graph.
//!
//! ```text
//! DataSource -> AnalysisPipeline -> ProfileSet -> NamingTask -> ReportGenerator
//!                                        \-> plot payload (display settings)
//! ```
//!
//! The synchronous pipeline is memoized on a fingerprint of the input table
//! and the analysis settings. Display changes only affect the plot payload
//! and never reach the async stages. A bridge task subscribes to naming
//! transitions and hands each terminal one to the report generator.

pub mod source;

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::Xxh3;

use crate::analysis::pipeline::{AnalysisOutcome, AnalysisPipeline, PipelineStatus};
use crate::analysis::summary::{plot_payload, PlotPayload, SummaryTable};
use crate::core::config::{AnalysisSettings, CompsetConfig, DisplaySettings, Language};
use crate::core::errors::Result;
use crate::service::TextGenerationService;
use crate::tasks::handle::{TaskEvent, TaskObserver};
use crate::tasks::naming::{resolve_names, NamingSnapshot, NamingTask};
use crate::tasks::report::{Report, ReportGenerator};

pub use source::{source_for_path, CsvFileSource, DataSource, InMemorySource, JsonFileSource};

/// Wiring of one analysis: source, pipeline, async stages and their slots.
pub struct AnalysisContext {
    source: Arc<dyn DataSource>,
    language: Language,
    analysis: Arc<ArcSwap<AnalysisSettings>>,
    display: ArcSwap<DisplaySettings>,
    status: ArcSwap<PipelineStatus>,
    outcome: Arc<ArcSwapOption<AnalysisOutcome>>,
    last_fingerprint: Mutex<Option<u64>>,
    naming: NamingTask,
    report: ReportGenerator,
    handoff: watch::Sender<u64>,
    bridge: Option<JoinHandle<()>>,
}

impl AnalysisContext {
    /// Build a context. The naming-to-report bridge is spawned when called
    /// inside a tokio runtime; without one only the synchronous stages work.
    pub fn new(
        config: CompsetConfig,
        source: Arc<dyn DataSource>,
        service: Arc<dyn TextGenerationService>,
        observers: Vec<Arc<dyn TaskObserver>>,
    ) -> Result<Self> {
        config.validate()?;
        let language = config.language;
        let naming = NamingTask::new(
            Arc::clone(&service),
            &config.service,
            language,
            observers.clone(),
        );
        let report = ReportGenerator::new(service, &config.service, language, observers);
        let outcome = Arc::new(ArcSwapOption::empty());
        let analysis = Arc::new(ArcSwap::from_pointee(config.analysis));
        let (handoff, _) = watch::channel(0);

        let bridge = tokio::runtime::Handle::try_current().ok().map(|handle| {
            // subscribed before any submit so no terminal transition is missed
            let events = naming.handle().subscribe();
            handle.spawn(bridge_naming_to_report(
                events,
                Stages {
                    naming: naming.clone(),
                    report: report.clone(),
                    analysis: Arc::clone(&analysis),
                    language,
                },
                Arc::clone(&outcome),
                handoff.clone(),
            ))
        });
        if bridge.is_none() {
            warn!("No async runtime; naming and report stages are disabled");
        }

        Ok(Self {
            source,
            language,
            analysis,
            display: ArcSwap::from_pointee(config.display),
            status: ArcSwap::from_pointee(PipelineStatus::Loading),
            outcome,
            last_fingerprint: Mutex::new(None),
            naming,
            report,
            handoff,
            bridge,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Current pipeline status.
    pub fn status(&self) -> PipelineStatus {
        self.status.load().as_ref().clone()
    }

    /// Artifacts of the last successful run.
    pub fn outcome(&self) -> Option<Arc<AnalysisOutcome>> {
        self.outcome.load_full()
    }

    pub fn naming(&self) -> &NamingTask {
        &self.naming
    }

    pub fn report_generator(&self) -> &ReportGenerator {
        &self.report
    }

    /// Current report view.
    pub fn report(&self) -> Report {
        self.report.report()
    }

    /// Fetch the current table and recompute if it or the settings changed.
    pub fn refresh(&self) -> PipelineStatus {
        self.set_status(PipelineStatus::Loading);
        let table = match self.source.fetch() {
            Ok(table) => table,
            Err(e) => return self.fail(&e),
        };

        let analysis = self.analysis.load_full();
        let fingerprint = input_fingerprint(table.fingerprint(), &analysis);
        {
            let last = self.last_fingerprint.lock();
            if *last == Some(fingerprint) && self.outcome.load().is_some() {
                debug!("Input unchanged ({fingerprint:016x}); reusing analysis");
                return self.set_status(PipelineStatus::Ready);
            }
        }

        self.report.mark_regenerating();
        self.set_status(PipelineStatus::Computing);
        let pipeline = AnalysisPipeline::new(analysis.as_ref().clone(), self.language);
        let outcome = match pipeline.run(Arc::new(table)) {
            Ok(outcome) => Arc::new(outcome),
            Err(e) => return self.fail(&e),
        };
        *self.last_fingerprint.lock() = Some(fingerprint);
        self.outcome.store(Some(Arc::clone(&outcome)));
        self.trigger_naming(&outcome);
        self.set_status(PipelineStatus::Ready)
    }

    fn trigger_naming(&self, outcome: &AnalysisOutcome) {
        let hash = outcome.profiles.content_hash;
        if self.bridge.is_none() {
            self.report.clear();
            return;
        }
        match self.naming.submit(&outcome.profiles) {
            Ok(Some(id)) => debug!("Naming request {id} for content hash {hash}"),
            Ok(None) if self.report.last_submitted_hash() == Some(hash) => self.report.restore(),
            Ok(None) => {
                // naming for this hash settled while no outcome was published
                let snapshot = self.naming.handle().snapshot();
                let naming_hash = snapshot.input.as_ref().map(|input| input.content_hash);
                if snapshot.status.is_terminal()
                    && !self.naming.handle().in_flight()
                    && naming_hash == Some(hash)
                {
                    debug!("Naming for content hash {hash} already settled; handing off now");
                    self.stages().hand_off(&snapshot, outcome);
                }
            }
            Err(e) => warn!("Could not start naming: {e}"),
        }
    }

    fn stages(&self) -> Stages {
        Stages {
            naming: self.naming.clone(),
            report: self.report.clone(),
            analysis: Arc::clone(&self.analysis),
            language: self.language,
        }
    }

    fn fail(&self, error: &crate::core::errors::CompsetError) -> PipelineStatus {
        warn!("Analysis failed: {error}");
        self.outcome.store(None);
        *self.last_fingerprint.lock() = None;
        self.report.clear();
        self.set_status(PipelineStatus::from_error(error))
    }

    fn set_status(&self, status: PipelineStatus) -> PipelineStatus {
        self.status.store(Arc::new(status.clone()));
        status
    }

    /// Replace analysis settings; takes effect on the next refresh.
    pub fn set_analysis_settings(&self, settings: AnalysisSettings) -> Result<()> {
        settings.validate()?;
        self.analysis.store(Arc::new(settings));
        Ok(())
    }

    /// Replace display settings. Never re-runs analysis or async stages.
    pub fn set_display(&self, display: DisplaySettings) {
        self.display.store(Arc::new(display));
    }

    pub fn display(&self) -> DisplaySettings {
        self.display.load().as_ref().clone()
    }

    /// Plot payload for the current outcome.
    pub fn plot(&self) -> Option<PlotPayload> {
        let outcome = self.outcome()?;
        let analysis = self.analysis.load();
        Some(plot_payload(
            &outcome.table,
            &outcome.prepared,
            &outcome.clustering.assignment,
            &outcome.projection,
            &analysis,
            &self.display.load(),
        ))
    }

    /// Segment names for the current outcome, defaults until naming succeeds.
    pub fn names(&self) -> Vec<String> {
        match self.outcome() {
            Some(outcome) => self.naming.resolved_names(&outcome.profiles),
            None => Vec::new(),
        }
    }

    /// Cluster summary table with the current names.
    pub fn summary_table(&self) -> Option<SummaryTable> {
        let outcome = self.outcome()?;
        Some(build_summary(
            &outcome,
            &self.naming.resolved_names(&outcome.profiles),
            &self.analysis.load().brand_column,
            self.language,
        ))
    }

    /// Wait for naming, the hand-off, and the report to finish.
    pub async fn settled(&self) -> Report {
        let naming = self.naming.settled().await;
        if self.bridge.is_some() {
            let mut processed = self.handoff.subscribe();
            while *processed.borrow_and_update() < naming.request_id {
                if processed.changed().await.is_err() {
                    break;
                }
            }
        }
        self.report.settled().await
    }
}

impl Drop for AnalysisContext {
    fn drop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.abort();
        }
    }
}

fn build_summary(
    outcome: &AnalysisOutcome,
    names: &[String],
    brand_column: &str,
    language: Language,
) -> SummaryTable {
    SummaryTable::build(
        &outcome.table,
        &outcome.prepared,
        &outcome.clustering.assignment,
        &outcome.profiles,
        names,
        brand_column,
        language,
    )
}

/// Fingerprint of everything the synchronous pipeline depends on.
fn input_fingerprint(table_fingerprint: u64, analysis: &AnalysisSettings) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(&table_fingerprint.to_le_bytes());
    // settings serialize deterministically; a failure only weakens memoization
    if let Ok(bytes) = serde_json::to_vec(analysis) {
        hasher.update(&bytes);
    }
    hasher.digest()
}

/// The async stages plus the live settings the report table depends on.
struct Stages {
    naming: NamingTask,
    report: ReportGenerator,
    analysis: Arc<ArcSwap<AnalysisSettings>>,
    language: Language,
}

impl Stages {
    /// Build the summary over the settled names and submit the report.
    fn hand_off(&self, snapshot: &NamingSnapshot, current: &AnalysisOutcome) {
        let hash = current.profiles.content_hash;
        let names = resolve_names(snapshot, hash, current.profiles.len());
        let table = build_summary(
            current,
            &names,
            &self.analysis.load().brand_column,
            self.language,
        );
        info!(
            "Naming settled as {:?}; handing {} segments to the report",
            snapshot.status,
            names.len()
        );
        if let Err(e) = self.report.on_naming_settled(hash, &table) {
            warn!("Could not start report: {e}");
        }
    }
}

async fn bridge_naming_to_report(
    mut events: watch::Receiver<TaskEvent>,
    stages: Stages,
    outcome: Arc<ArcSwapOption<AnalysisOutcome>>,
    handoff: watch::Sender<u64>,
) {
    let mut last_seen = 0;
    while events.changed().await.is_ok() {
        let event = *events.borrow_and_update();
        if event.in_flight || !event.status.is_terminal() || event.request_id == last_seen {
            continue;
        }
        last_seen = event.request_id;

        let snapshot = stages.naming.handle().snapshot();
        let naming_hash = snapshot.input.as_ref().map(|input| input.content_hash);
        match outcome.load_full() {
            Some(current) if naming_hash == Some(current.profiles.content_hash) => {
                stages.hand_off(&snapshot, &current);
            }
            _ => debug!(
                "Naming request {} no longer matches the current analysis",
                event.request_id
            ),
        }
        handoff.send_replace(event.request_id);
    }
}
