//! Async stages: segment naming and the narrative report.

pub mod handle;
pub mod naming;
pub mod notify;
pub mod report;

pub use handle::{SingleFlightTask, TaskEvent, TaskObserver, TaskRunner, TaskSnapshot, TaskStatus};
pub use naming::{NamingInput, NamingTask};
pub use notify::{BusyIndicator, NotificationObserver, Notifier, TracingNotifier};
pub use report::{Report, ReportGenerator, ReportState};
