mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use tempfile::tempdir;

use compset_rs::context::source_for_path;
use compset_rs::core::config::{AnalysisSettings, DisplaySettings};
use compset_rs::tasks::{BusyIndicator, NotificationObserver, Notifier, TaskObserver};
use compset_rs::{
    AnalysisContext, CompsetConfig, DataSource, DisabledService, InMemorySource, Language,
    ObservationTable, PipelineStatus, ReportState, TaskStatus, TextGenerationService,
};

use common::{renamed_attribute_table, three_segment_records, three_segment_table, CountingService};

fn english() -> CompsetConfig {
    CompsetConfig::default().with_language(Language::En)
}

fn context_over(
    source: Arc<InMemorySource>,
    service: Arc<dyn TextGenerationService>,
) -> Result<AnalysisContext> {
    let source: Arc<dyn DataSource> = source;
    Ok(AnalysisContext::new(english(), source, service, Vec::new())?)
}

#[tokio::test]
async fn naming_and_report_run_once_per_profile_set() -> Result<()> {
    let service = CountingService::new();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(Arc::clone(&source), service.clone())?;

    assert_eq!(context.refresh(), PipelineStatus::Ready);
    let report = context.settled().await;
    assert_eq!(report.state, ReportState::Ready);
    assert_eq!(context.names(), vec!["Name 1", "Name 2", "Name 3"]);
    assert_eq!(service.naming_calls(), 1);
    assert_eq!(service.report_calls(), 1);

    // unchanged input is memoized
    assert_eq!(context.refresh(), PipelineStatus::Ready);
    context.settled().await;
    assert_eq!(service.naming_calls(), 1);

    // a settings change re-runs the pipeline but the profiles hash the same
    let mut settings = AnalysisSettings::default();
    settings.kmeans_seed = 7;
    context.set_analysis_settings(settings)?;
    assert_eq!(context.refresh(), PipelineStatus::Ready);
    assert_eq!(context.report().state, ReportState::Ready);
    let report = context.settled().await;

    assert_eq!(report.state, ReportState::Ready);
    assert_eq!(service.naming_calls(), 1);
    assert_eq!(service.report_calls(), 1);
    assert_eq!(context.naming().status(), TaskStatus::Success);
    Ok(())
}

#[tokio::test]
async fn naming_failure_keeps_default_segment_names() -> Result<()> {
    let service = CountingService::failing_naming();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(source, service.clone())?;

    context.refresh();
    let report = context.settled().await;

    assert_eq!(context.naming().status(), TaskStatus::Error);
    assert_eq!(context.names(), vec!["Segment 1", "Segment 2", "Segment 3"]);
    let summary = context.summary_table().expect("summary");
    assert!(summary.rows.iter().all(|r| r.name.starts_with("Segment ")));

    // the report still runs, over the default names
    assert_eq!(report.state, ReportState::Ready);
    assert_eq!(service.report_calls(), 1);
    let prompts = service.report_prompts();
    assert!(prompts[0].contains("Segment 1 | "));
    Ok(())
}

#[tokio::test]
async fn display_changes_never_reach_the_async_stages() -> Result<()> {
    let service = CountingService::new();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(source, service.clone())?;

    context.refresh();
    context.settled().await;
    assert_eq!(context.plot().map(|p| p.marker_size), Some(10.0));

    context.set_display(DisplaySettings {
        marker_size: 20.0,
        show_centers: true,
        highlight_brand: Some("acme".to_string()),
    });
    context.refresh();
    context.settled().await;

    let plot = context.plot().expect("plot");
    assert_eq!(plot.marker_size, 20.0);
    assert_eq!(plot.centers.as_ref().map(Vec::len), Some(3));
    assert_eq!(plot.points.iter().filter(|p| p.highlight).count(), 6);
    assert_eq!(service.naming_calls(), 1);
    assert_eq!(service.report_calls(), 1);
    assert_eq!(context.report().state, ReportState::Ready);
    Ok(())
}

#[tokio::test]
async fn data_change_shows_placeholder_until_the_new_report() -> Result<()> {
    let service = CountingService::new();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(Arc::clone(&source), service.clone())?;

    context.refresh();
    let first = context.settled().await;
    let first_hash = first.source_hash;

    source.replace(renamed_attribute_table());
    assert_eq!(context.refresh(), PipelineStatus::Ready);
    let pending = context.report();
    assert_eq!(pending.state, ReportState::Regenerating);
    assert_eq!(pending.text, "Regenerating report...");

    let second = context.settled().await;
    assert_eq!(second.state, ReportState::Ready);
    assert_ne!(second.source_hash, first_hash);
    assert_eq!(service.naming_calls(), 2);
    assert_eq!(service.report_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn report_failure_is_shown_in_the_report_slot() -> Result<()> {
    let service = CountingService::failing_report();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(source, service)?;

    context.refresh();
    let report = context.settled().await;

    assert_eq!(report.state, ReportState::Failed);
    assert!(report.text.starts_with("error:"));
    assert!(report.text.contains("report unavailable"));
    // naming succeeded independently
    assert_eq!(context.names()[0], "Name 1");
    Ok(())
}

#[tokio::test]
async fn analysis_failure_clears_every_artifact() -> Result<()> {
    let service = CountingService::new();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(Arc::clone(&source), service.clone())?;

    context.refresh();
    context.settled().await;

    let records: Vec<_> = three_segment_records().into_iter().take(2).collect();
    source.replace(ObservationTable::from_records(&records)?);
    let status = context.refresh();

    assert!(status.to_string().starts_with("error:"));
    assert!(context.outcome().is_none());
    assert!(context.plot().is_none());
    assert!(context.names().is_empty());
    assert_eq!(context.report().state, ReportState::Empty);
    assert_eq!(service.naming_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn naming_settled_during_a_failed_analysis_still_reaches_the_report() -> Result<()> {
    let (service, gate) = CountingService::gated();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(Arc::clone(&source), service.clone())?;

    // naming for the first run is held by the gate
    assert_eq!(context.refresh(), PipelineStatus::Ready);
    let records: Vec<_> = three_segment_records().into_iter().take(2).collect();
    source.replace(ObservationTable::from_records(&records)?);
    assert!(context.refresh().to_string().starts_with("error:"));

    gate.add_permits(1);
    let report = context.settled().await;
    assert_eq!(context.naming().status(), TaskStatus::Success);
    assert_eq!(report.state, ReportState::Empty);
    assert_eq!(service.report_calls(), 0);

    source.replace(three_segment_table());
    assert_eq!(context.refresh(), PipelineStatus::Ready);
    let report = context.settled().await;

    assert_eq!(report.state, ReportState::Ready);
    assert_eq!(context.names(), vec!["grip", "weight", "price"]);
    assert_eq!(service.naming_calls(), 1);
    assert_eq!(service.report_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn superseded_naming_never_names_the_new_profiles() -> Result<()> {
    let (service, gate) = CountingService::gated();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(Arc::clone(&source), service.clone())?;

    context.refresh();
    source.replace(renamed_attribute_table());
    assert_eq!(context.refresh(), PipelineStatus::Ready);

    // the first naming call finishes after the second was queued
    gate.add_permits(2);
    let report = context.settled().await;

    let outcome = context.outcome().expect("outcome");
    assert_eq!(context.names(), vec!["grip", "weight", "value"]);
    assert_eq!(report.state, ReportState::Ready);
    assert_eq!(report.source_hash, Some(outcome.profiles.content_hash));
    assert_eq!(service.naming_calls(), 2);
    assert_eq!(service.report_calls(), 1);
    let prompts = service.report_prompts();
    assert!(prompts[0].contains("value"));
    assert!(!prompts[0].contains("price"));
    Ok(())
}

#[tokio::test]
async fn report_table_uses_the_brand_column_of_the_latest_settings() -> Result<()> {
    let (service, gate) = CountingService::gated();
    let source = Arc::new(InMemorySource::new(three_segment_table()));
    let context = context_over(source, service.clone())?;

    context.refresh();
    let mut settings = AnalysisSettings::default();
    settings.brand_column = "maker".to_string();
    context.set_analysis_settings(settings)?;
    assert_eq!(context.refresh(), PipelineStatus::Ready);

    gate.add_permits(1);
    let report = context.settled().await;
    assert_eq!(report.state, ReportState::Ready);

    // without a brand column every item counts as its own company
    let summary = context.summary_table().expect("summary");
    assert!(summary.rows.iter().all(|row| row.company_count == 4));
    let prompts = service.report_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(&summary.to_delimited()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fast_naming_failure_on_a_worker_pool_still_reaches_the_report() -> Result<()> {
    let source: Arc<dyn DataSource> = Arc::new(InMemorySource::new(three_segment_table()));
    let context = AnalysisContext::new(
        english(),
        source,
        Arc::new(DisabledService::new("offline mode")),
        Vec::new(),
    )?;

    assert_eq!(context.refresh(), PipelineStatus::Ready);
    let report = tokio::time::timeout(Duration::from_secs(5), context.settled()).await?;

    assert_eq!(context.naming().status(), TaskStatus::Error);
    assert_eq!(report.state, ReportState::Failed);
    assert!(report.text.contains("offline mode"));
    Ok(())
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Notifier for Recorder {
    fn started(&self, task: &str) {
        self.events.lock().push(format!("{task}:started"));
    }
    fn succeeded(&self, task: &str) {
        self.events.lock().push(format!("{task}:success"));
    }
    fn failed(&self, task: &str, _error: &str) {
        self.events.lock().push(format!("{task}:failure"));
    }
}

impl BusyIndicator for Recorder {
    fn set_busy(&self, task: &str, busy: bool) {
        self.events.lock().push(format!("{task}:busy={busy}"));
    }
}

#[tokio::test]
async fn notifications_follow_both_stages() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    let observer =
        NotificationObserver::new(recorder.clone()).with_busy_indicator(recorder.clone());
    let observers: Vec<Arc<dyn TaskObserver>> = vec![Arc::new(observer)];
    let source: Arc<dyn DataSource> = Arc::new(InMemorySource::new(three_segment_table()));
    let context = AnalysisContext::new(english(), source, CountingService::new(), observers)?;

    context.refresh();
    context.settled().await;

    let events = recorder.events.lock().clone();
    for expected in [
        "segment naming:started",
        "segment naming:success",
        "segment report:started",
        "segment report:success",
    ] {
        assert!(events.iter().any(|e| e == expected), "missing {expected}: {events:?}");
    }
    let last_naming_busy = events
        .iter()
        .rev()
        .find(|e| e.starts_with("segment naming:busy"));
    assert_eq!(last_naming_busy.map(String::as_str), Some("segment naming:busy=false"));
    Ok(())
}

#[tokio::test]
async fn offline_csv_analysis_reports_service_errors() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("items.csv");
    let records = three_segment_records();
    let header = ["product_id", "brand", "grip", "weight", "price", "durability", "sales"];
    let mut csv = header.join(",");
    for record in &records {
        csv.push('\n');
        let cells: Vec<String> = header
            .iter()
            .map(|column| match &record[*column] {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        csv.push_str(&cells.join(","));
    }
    fs::write(&path, csv)?;

    let source: Arc<dyn DataSource> = Arc::from(source_for_path(&path)?);
    let context = AnalysisContext::new(
        english(),
        source,
        Arc::new(DisabledService::new("offline mode")),
        Vec::new(),
    )?;

    assert_eq!(context.refresh(), PipelineStatus::Ready);
    let report = context.settled().await;

    assert_eq!(context.outcome().map(|o| o.n_clusters()), Some(3));
    assert_eq!(context.names(), vec!["Segment 1", "Segment 2", "Segment 3"]);
    assert_eq!(report.state, ReportState::Failed);
    assert!(report.text.contains("offline mode"));
    Ok(())
}

#[test]
fn without_a_runtime_only_the_synchronous_stages_run() -> Result<()> {
    let source: Arc<dyn DataSource> = Arc::new(InMemorySource::new(three_segment_table()));
    let context = AnalysisContext::new(english(), source, CountingService::new(), Vec::new())?;

    assert_eq!(context.refresh(), PipelineStatus::Ready);
    assert_eq!(context.plot().map(|p| p.points.len()), Some(12));
    assert_eq!(context.names(), vec!["Segment 1", "Segment 2", "Segment 3"]);
    assert_eq!(context.report().state, ReportState::Empty);
    Ok(())
}
