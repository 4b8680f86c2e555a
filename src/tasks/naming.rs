//! Segment naming through the external text-generation service.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::handle::{SingleFlightTask, TaskObserver, TaskRunner, TaskSnapshot, TaskStatus};
use crate::analysis::characterize::ProfileSet;
use crate::analysis::summary::default_segment_names;
use crate::core::config::{Language, ServiceSettings};
use crate::core::errors::{CompsetError, Result};
use crate::service::prompts::{naming_prompt, naming_system_instruction};
use crate::service::{parse_name_list, GenerationRequest, RequestPurpose, TextGenerationService};

/// Task name used in notifications.
pub const NAMING_TASK: &str = "segment naming";

/// What a naming invocation works on.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingInput {
    pub content_hash: u32,
    /// Characteristics text per cluster, in cluster id order
    pub characteristics: Vec<String>,
}

impl NamingInput {
    pub fn from_profiles(profiles: &ProfileSet) -> Self {
        Self {
            content_hash: profiles.content_hash,
            characteristics: profiles
                .characteristics()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.characteristics.len()
    }
}

/// Snapshot type of the naming slot.
pub type NamingSnapshot = TaskSnapshot<NamingInput, Vec<String>>;

/// Single-flight naming keyed by the profile content hash.
#[derive(Clone)]
pub struct NamingTask {
    task: SingleFlightTask<NamingInput, Vec<String>>,
    last_triggered: Arc<Mutex<Option<u32>>>,
}

impl NamingTask {
    pub fn new(
        service: Arc<dyn TextGenerationService>,
        settings: &ServiceSettings,
        language: Language,
        observers: Vec<Arc<dyn TaskObserver>>,
    ) -> Self {
        let runner = naming_runner(
            service,
            settings.model.clone(),
            Duration::from_secs(settings.timeout_secs),
            language,
        );
        Self {
            task: SingleFlightTask::with_observers(NAMING_TASK, runner, observers),
            last_triggered: Arc::new(Mutex::new(None)),
        }
    }

    /// Underlying task handle.
    pub fn handle(&self) -> &SingleFlightTask<NamingInput, Vec<String>> {
        &self.task
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Hash of the last profile set that triggered an invocation.
    pub fn last_triggered_hash(&self) -> Option<u32> {
        *self.last_triggered.lock()
    }

    /// Invoke for a new profile set unless its hash matches the last trigger.
    ///
    /// Returns the request id, or `None` when deduplicated.
    pub fn submit(&self, profiles: &ProfileSet) -> Result<Option<u64>> {
        let input = NamingInput::from_profiles(profiles);
        let mut last = self.last_triggered.lock();
        if *last == Some(input.content_hash) {
            debug!(
                "Naming skipped: content hash {} already triggered",
                input.content_hash
            );
            return Ok(None);
        }
        let hash = input.content_hash;
        let id = self.task.invoke(input)?;
        *last = Some(hash);
        Ok(Some(id))
    }

    /// Names to display for `profiles`; default names unless a matching success exists.
    pub fn resolved_names(&self, profiles: &ProfileSet) -> Vec<String> {
        resolve_names(&self.task.snapshot(), profiles.content_hash, profiles.len())
    }

    /// Wait for the current invocation chain to finish.
    pub async fn settled(&self) -> Arc<NamingSnapshot> {
        self.task.settled().await
    }
}

/// Names from a snapshot when it is a success for `content_hash` with `n` names.
pub fn resolve_names(snapshot: &NamingSnapshot, content_hash: u32, n: usize) -> Vec<String> {
    let matches_input = snapshot
        .input
        .as_ref()
        .is_some_and(|input| input.content_hash == content_hash);
    match (&snapshot.status, &snapshot.result) {
        (TaskStatus::Success, Some(names)) if matches_input && names.len() == n => {
            names.as_ref().clone()
        }
        _ => default_segment_names(n),
    }
}

fn naming_runner(
    service: Arc<dyn TextGenerationService>,
    model: String,
    timeout: Duration,
    language: Language,
) -> TaskRunner<NamingInput, Vec<String>> {
    Arc::new(move |input: Arc<NamingInput>| {
        let service = Arc::clone(&service);
        let model = model.clone();
        async move {
            let characteristics: Vec<&str> =
                input.characteristics.iter().map(String::as_str).collect();
            let request = GenerationRequest {
                system_instruction: naming_system_instruction(language),
                prompt: naming_prompt(language, &characteristics),
                model,
                purpose: RequestPurpose::Naming,
            };

            let text = tokio::time::timeout(timeout, service.generate(request))
                .await
                .map_err(|_| {
                    CompsetError::naming_service(format!("timed out after {}s", timeout.as_secs()))
                })??;

            let names = parse_name_list(&text)?;
            if names.len() != input.n_clusters() {
                warn!(
                    "Naming returned {} names for {} clusters; using default names",
                    names.len(),
                    input.n_clusters()
                );
                return Err(CompsetError::naming_service(format!(
                    "expected {} names, got {}",
                    input.n_clusters(),
                    names.len()
                )));
            }
            info!("Named {} segments via {}", names.len(), service.name());
            Ok(names)
        }
        .boxed()
    })
}
