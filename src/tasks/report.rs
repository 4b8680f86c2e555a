//! Narrative segment report, generated after each naming transition.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::handle::{SingleFlightTask, TaskObserver, TaskRunner, TaskStatus};
use crate::analysis::summary::SummaryTable;
use crate::core::config::{Language, ServiceSettings};
use crate::core::errors::{CompsetError, Result};
use crate::service::prompts::{report_prompt, report_system_instruction};
use crate::service::{GenerationRequest, RequestPurpose, TextGenerationService};

/// Task name used in notifications.
pub const REPORT_TASK: &str = "segment report";

/// What a report invocation works on.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportInput {
    pub content_hash: u32,
    /// Delimited summary table embedded in the prompt
    pub table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportState {
    /// Nothing generated yet
    Empty,
    /// Upstream changed or a request is outstanding
    Regenerating,
    Ready,
    Failed,
}

/// Consistent view of the report slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub state: ReportState,
    /// Markdown, placeholder or error string
    pub text: String,
    pub source_hash: Option<u32>,
}

fn regenerating_placeholder(language: Language) -> &'static str {
    match language {
        Language::En => "Regenerating report...",
        Language::ZhTw => "報告重新產生中...",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Live,
    Regenerating,
    Cleared,
}

/// Report generator with content-hash deduplication.
#[derive(Clone)]
pub struct ReportGenerator {
    task: SingleFlightTask<ReportInput, String>,
    marker: Arc<ArcSwap<Marker>>,
    last_submitted: Arc<Mutex<Option<u32>>>,
    language: Language,
}

impl ReportGenerator {
    pub fn new(
        service: Arc<dyn TextGenerationService>,
        settings: &ServiceSettings,
        language: Language,
        observers: Vec<Arc<dyn TaskObserver>>,
    ) -> Self {
        let runner = report_runner(
            service,
            settings.model.clone(),
            Duration::from_secs(settings.timeout_secs),
            settings.max_report_words,
            language,
        );
        Self {
            task: SingleFlightTask::with_observers(REPORT_TASK, runner, observers),
            marker: Arc::new(ArcSwap::from_pointee(Marker::Live)),
            last_submitted: Arc::new(Mutex::new(None)),
            language,
        }
    }

    /// Underlying task handle.
    pub fn handle(&self) -> &SingleFlightTask<ReportInput, String> {
        &self.task
    }

    /// Hash of the last submitted report.
    pub fn last_submitted_hash(&self) -> Option<u32> {
        *self.last_submitted.lock()
    }

    /// Handle a terminal naming transition for `content_hash`.
    ///
    /// Returns the request id, or `None` when a report for this hash was
    /// already submitted.
    pub fn on_naming_settled(&self, content_hash: u32, table: &SummaryTable) -> Result<Option<u64>> {
        let mut last = self.last_submitted.lock();
        if *last == Some(content_hash) {
            debug!("Report skipped: content hash {content_hash} already submitted");
            self.marker.store(Arc::new(Marker::Live));
            return Ok(None);
        }
        let id = self.task.invoke(ReportInput {
            content_hash,
            table: table.to_delimited(),
        })?;
        *last = Some(content_hash);
        self.marker.store(Arc::new(Marker::Live));
        info!("Report requested for content hash {content_hash}");
        Ok(Some(id))
    }

    /// Show the placeholder until the next naming transition.
    pub fn mark_regenerating(&self) {
        self.marker.store(Arc::new(Marker::Regenerating));
    }

    /// Drop the placeholder and show the last report again.
    pub fn restore(&self) {
        self.marker.store(Arc::new(Marker::Live));
    }

    /// Hide the report, e.g. when the analysis itself failed.
    pub fn clear(&self) {
        self.marker.store(Arc::new(Marker::Cleared));
    }

    /// Current report view.
    pub fn report(&self) -> Report {
        let snapshot = self.task.snapshot();
        let source_hash = snapshot.input.as_ref().map(|i| i.content_hash);
        let marker = **self.marker.load();

        if marker == Marker::Cleared {
            return Report {
                state: ReportState::Empty,
                text: String::new(),
                source_hash: None,
            };
        }
        if marker == Marker::Regenerating || self.task.in_flight() {
            return Report {
                state: ReportState::Regenerating,
                text: regenerating_placeholder(self.language).to_string(),
                source_hash,
            };
        }
        match (snapshot.status, &snapshot.result, &snapshot.error) {
            (TaskStatus::Success, Some(text), _) => Report {
                state: ReportState::Ready,
                text: text.as_ref().clone(),
                source_hash,
            },
            (TaskStatus::Error, _, error) => Report {
                state: ReportState::Failed,
                text: format!("error: {}", error.as_deref().unwrap_or("report failed")),
                source_hash,
            },
            _ => Report {
                state: ReportState::Empty,
                text: String::new(),
                source_hash,
            },
        }
    }

    /// Wait for the outstanding report, then return the view.
    pub async fn settled(&self) -> Report {
        self.task.settled().await;
        self.report()
    }
}

fn report_runner(
    service: Arc<dyn TextGenerationService>,
    model: String,
    timeout: Duration,
    max_words: usize,
    language: Language,
) -> TaskRunner<ReportInput, String> {
    Arc::new(move |input: Arc<ReportInput>| {
        let service = Arc::clone(&service);
        let request = GenerationRequest {
            system_instruction: report_system_instruction(language),
            prompt: report_prompt(language, &input.table, max_words),
            model: model.clone(),
            purpose: RequestPurpose::Report,
        };
        async move {
            tokio::time::timeout(timeout, service.generate(request))
                .await
                .map_err(|_| {
                    CompsetError::report_service(format!("timed out after {}s", timeout.as_secs()))
                })?
        }
        .boxed()
    })
}
