//! Notifications and busy indicator for the async stages.

use std::sync::Arc;

use tracing::{error, info};

use super::handle::{TaskObserver, TaskStatus};

/// User-facing notifications for an async stage.
pub trait Notifier: Send + Sync {
    fn started(&self, task: &str);
    fn succeeded(&self, task: &str);
    fn failed(&self, task: &str, error: &str);
}

/// Busy indicator toggled while a stage is running.
pub trait BusyIndicator: Send + Sync {
    fn set_busy(&self, task: &str, busy: bool);
}

/// Notifier that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn started(&self, task: &str) {
        info!("{task}: started");
    }

    fn succeeded(&self, task: &str) {
        info!("{task}: completed");
    }

    fn failed(&self, task: &str, error: &str) {
        error!("{task}: failed: {error}");
    }
}

/// Adapts a [`Notifier`] and optional [`BusyIndicator`] to task transitions.
#[derive(Clone)]
pub struct NotificationObserver {
    notifier: Arc<dyn Notifier>,
    busy: Option<Arc<dyn BusyIndicator>>,
}

impl NotificationObserver {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            busy: None,
        }
    }

    pub fn with_busy_indicator(mut self, busy: Arc<dyn BusyIndicator>) -> Self {
        self.busy = Some(busy);
        self
    }
}

impl TaskObserver for NotificationObserver {
    fn on_invoke(&self, task: &str, _request_id: u64) {
        self.notifier.started(task);
    }

    fn on_status(&self, task: &str, status: TaskStatus) {
        if let Some(busy) = &self.busy {
            busy.set_busy(task, status == TaskStatus::Running);
        }
    }

    fn on_settled(&self, task: &str, _request_id: u64, status: TaskStatus, error: Option<&str>) {
        match status {
            TaskStatus::Success => self.notifier.succeeded(task),
            _ => self
                .notifier
                .failed(task, error.unwrap_or("unknown error")),
        }
    }
}
