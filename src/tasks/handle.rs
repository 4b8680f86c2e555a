//! Single-slot async task handle with supersede semantics.
//!
//! At most one invocation runs at a time. Invoking while running parks the
//! input in a size-1 pending slot, replacing whatever was parked there. When
//! the running invocation finishes, its result is published only if no newer
//! invocation exists; otherwise it is discarded and the pending input runs.
//!
//! Snapshots are published atomically through an [`ArcSwap`] slot, and every
//! transition is announced on a [`watch`] channel.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::errors::{CompsetError, Result};

/// Lifecycle of a task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Idle,
    Running,
    Success,
    Error,
}

impl TaskStatus {
    /// Whether this is a terminal state of an invocation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Consistent view of the task slot.
#[derive(Debug)]
pub struct TaskSnapshot<I, O> {
    pub status: TaskStatus,
    /// Request the snapshot belongs to; 0 before the first invocation
    pub request_id: u64,
    pub input: Option<Arc<I>>,
    pub result: Option<Arc<O>>,
    pub error: Option<String>,
}

impl<I, O> TaskSnapshot<I, O> {
    fn idle() -> Self {
        Self {
            status: TaskStatus::Idle,
            request_id: 0,
            input: None,
            result: None,
            error: None,
        }
    }
}

/// Transition announcement sent on the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskEvent {
    pub status: TaskStatus,
    pub request_id: u64,
    /// An invocation is running or pending
    pub in_flight: bool,
}

/// Boundary side effects of task transitions.
pub trait TaskObserver: Send + Sync {
    /// A new invocation was accepted.
    fn on_invoke(&self, _task: &str, _request_id: u64) {}

    /// The published status changed.
    fn on_status(&self, _task: &str, _status: TaskStatus) {}

    /// An invocation reached a terminal state and was published.
    fn on_settled(&self, _task: &str, _request_id: u64, _status: TaskStatus, _error: Option<&str>) {}
}

/// Async function executed for each invocation.
pub type TaskRunner<I, O> = Arc<dyn Fn(Arc<I>) -> BoxFuture<'static, Result<O>> + Send + Sync>;

struct QueueState<I> {
    running: bool,
    pending: Option<(u64, Arc<I>)>,
    latest_id: u64,
}

struct Inner<I, O> {
    name: String,
    runner: TaskRunner<I, O>,
    queue: Mutex<QueueState<I>>,
    snapshot: ArcSwap<TaskSnapshot<I, O>>,
    events: watch::Sender<TaskEvent>,
    next_id: AtomicU64,
    observers: Vec<Arc<dyn TaskObserver>>,
}

/// Handle to a single-flight task; clones share the same slot.
pub struct SingleFlightTask<I, O> {
    inner: Arc<Inner<I, O>>,
}

impl<I, O> Clone for SingleFlightTask<I, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O> SingleFlightTask<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, runner: TaskRunner<I, O>) -> Self {
        Self::with_observers(name, runner, Vec::new())
    }

    pub fn with_observers(
        name: impl Into<String>,
        runner: TaskRunner<I, O>,
        observers: Vec<Arc<dyn TaskObserver>>,
    ) -> Self {
        let (events, _) = watch::channel(TaskEvent {
            status: TaskStatus::Idle,
            request_id: 0,
            in_flight: false,
        });
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                runner,
                queue: Mutex::new(QueueState {
                    running: false,
                    pending: None,
                    latest_id: 0,
                }),
                snapshot: ArcSwap::from_pointee(TaskSnapshot::idle()),
                events,
                next_id: AtomicU64::new(0),
                observers,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.inner.snapshot.load().status
    }

    /// Current snapshot; never a partial write.
    pub fn snapshot(&self) -> Arc<TaskSnapshot<I, O>> {
        self.inner.snapshot.load_full()
    }

    /// Result of the last successful invocation, if the slot holds one.
    pub fn result(&self) -> Option<Arc<O>> {
        self.inner.snapshot.load().result.clone()
    }

    /// Error of the last failed invocation, if the slot holds one.
    pub fn error(&self) -> Option<String> {
        self.inner.snapshot.load().error.clone()
    }

    /// Receiver for transition events.
    pub fn subscribe(&self) -> watch::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Whether an invocation is running or pending.
    pub fn in_flight(&self) -> bool {
        self.inner.events.borrow().in_flight
    }

    /// Start (or queue) an invocation and return its request id.
    ///
    /// Never blocks on a running invocation. Requires a tokio runtime.
    pub fn invoke(&self, input: I) -> Result<u64> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| CompsetError::internal(format!("no async runtime for task: {e}")))?;

        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let input = Arc::new(input);

        let start = {
            let mut queue = inner.queue.lock();
            queue.latest_id = id;
            if queue.running {
                if let Some((superseded, _)) = queue.pending.replace((id, input)) {
                    debug!("{}: request {} superseded by {}", inner.name, superseded, id);
                }
                inner.announce(TaskStatus::Running, id, true);
                None
            } else {
                queue.running = true;
                inner.publish_running(id, &input);
                Some(input)
            }
        };

        for observer in &inner.observers {
            observer.on_invoke(&inner.name, id);
        }

        if let Some(input) = start {
            inner.notify_status(TaskStatus::Running);
            let worker = Arc::clone(inner);
            handle.spawn(async move { worker.drive(id, input).await });
        }
        Ok(id)
    }

    /// Wait until nothing is running or pending, then return the snapshot.
    pub async fn settled(&self) -> Arc<TaskSnapshot<I, O>> {
        let mut events = self.subscribe();
        loop {
            if !events.borrow_and_update().in_flight {
                return self.snapshot();
            }
            if events.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }
}

impl<I, O> Inner<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn announce(&self, status: TaskStatus, request_id: u64, in_flight: bool) {
        self.events.send_replace(TaskEvent {
            status,
            request_id,
            in_flight,
        });
    }

    fn publish_running(&self, request_id: u64, input: &Arc<I>) {
        self.snapshot.store(Arc::new(TaskSnapshot {
            status: TaskStatus::Running,
            request_id,
            input: Some(Arc::clone(input)),
            result: None,
            error: None,
        }));
        self.announce(TaskStatus::Running, request_id, true);
    }

    fn notify_status(&self, status: TaskStatus) {
        for observer in &self.observers {
            observer.on_status(&self.name, status);
        }
    }

    async fn drive(self: Arc<Self>, first_id: u64, first_input: Arc<I>) {
        let (mut id, mut input) = (first_id, first_input);
        loop {
            let outcome = AssertUnwindSafe((self.runner)(Arc::clone(&input)))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(CompsetError::internal("task runner panicked")));

            // publish under the queue lock so a newer invocation cannot be overwritten
            let settled = {
                let mut queue = self.queue.lock();
                match queue.pending.take() {
                    Some(next) => {
                        debug!(
                            "{}: discarding result of stale request {} (latest {})",
                            self.name, id, queue.latest_id
                        );
                        self.publish_running(next.0, &next.1);
                        (id, input) = next;
                        None
                    }
                    None if queue.latest_id != id => {
                        warn!(
                            "{}: request {} finished after newer request {}; discarding",
                            self.name, id, queue.latest_id
                        );
                        queue.running = false;
                        self.announce(self.snapshot.load().status, queue.latest_id, false);
                        return;
                    }
                    None => {
                        queue.running = false;
                        let snapshot = match outcome {
                            Ok(result) => TaskSnapshot {
                                status: TaskStatus::Success,
                                request_id: id,
                                input: Some(Arc::clone(&input)),
                                result: Some(Arc::new(result)),
                                error: None,
                            },
                            Err(e) => TaskSnapshot {
                                status: TaskStatus::Error,
                                request_id: id,
                                input: Some(Arc::clone(&input)),
                                result: None,
                                error: Some(e.to_string()),
                            },
                        };
                        let status = snapshot.status;
                        let error = snapshot.error.clone();
                        self.snapshot.store(Arc::new(snapshot));
                        self.announce(status, id, false);
                        Some((status, error))
                    }
                }
            };

            match settled {
                Some((status, error)) => {
                    debug!("{}: request {} settled as {:?}", self.name, id, status);
                    self.notify_status(status);
                    for observer in &self.observers {
                        observer.on_settled(&self.name, id, status, error.as_deref());
                    }
                    return;
                }
                None => self.notify_status(TaskStatus::Running),
            }
        }
    }
}
