//! Lifecycle notification boundary.
//!
//! The queue and workers emit notifications through an injected
//! [`EventSink`]; observers (log shippers, dashboards, audit trails) live
//! entirely behind the trait. Delivery order matches emission order, and
//! a sink must never let its own failures leak back into task processing:
//! the trait is infallible by signature and implementations are expected
//! to swallow their errors.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::models::Task;

/// A lifecycle notification emitted by the queue or a worker.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A task entered the queue. `is_retry` distinguishes an automatic
    /// retry re-enqueue from a fresh enqueue.
    AddTask {
        /// The enqueued task.
        task: Task,
        /// Whether this enqueue was an automatic retry.
        is_retry: bool,
    },
    /// A worker claimed a task and is about to dispatch it.
    StartProcessing {
        /// The claimed task.
        task: Task,
        /// When processing began.
        start_time: DateTime<Utc>,
    },
    /// A worker finished executing a task (successfully or not).
    EndProcessing {
        /// The task that ran.
        task: Task,
        /// Wall-clock execution time.
        elapsed: Duration,
    },
    /// A handler logged a message.
    Log {
        /// The task being processed.
        task: Task,
        /// The message.
        message: String,
    },
    /// A handler raised a warning.
    Warn {
        /// The task being processed.
        task: Task,
        /// The message.
        message: String,
    },
    /// A failure was recorded against a task.
    Error {
        /// The task being processed.
        task: Task,
        /// The failure diagnostic.
        message: String,
    },
}

impl Notification {
    /// Stable kind string for log lines and filtering.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AddTask { .. } => "add-task",
            Self::StartProcessing { .. } => "start-processing",
            Self::EndProcessing { .. } => "end-processing",
            Self::Log { .. } => "log",
            Self::Warn { .. } => "warn",
            Self::Error { .. } => "error",
        }
    }

    /// The task the notification concerns.
    #[must_use]
    pub const fn task(&self) -> &Task {
        match self {
            Self::AddTask { task, .. }
            | Self::StartProcessing { task, .. }
            | Self::EndProcessing { task, .. }
            | Self::Log { task, .. }
            | Self::Warn { task, .. }
            | Self::Error { task, .. } => task,
        }
    }
}

/// Receives lifecycle notifications.
///
/// Implementations must not panic: a sink failure must never take down
/// task processing.
pub trait EventSink: Send + Sync {
    /// Delivers one notification.
    fn notify(&self, event: Notification);
}

/// Sink that forwards notifications to `tracing`.
///
/// This is the default sink wired into a [`Queue`](crate::queue::Queue)
/// built without an explicit one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: Notification) {
        match &event {
            Notification::AddTask { task, is_retry } => {
                tracing::info!(
                    target: "tasque::events",
                    task = %task.name(),
                    method = %task.method_name(),
                    is_retry = *is_retry,
                    "add-task"
                );
            }
            Notification::StartProcessing { task, start_time } => {
                tracing::info!(
                    target: "tasque::events",
                    task = %task.name(),
                    method = %task.method_name(),
                    start_time = %start_time,
                    "start-processing"
                );
            }
            Notification::EndProcessing { task, elapsed } => {
                tracing::info!(
                    target: "tasque::events",
                    task = %task.name(),
                    method = %task.method_name(),
                    elapsed_secs = elapsed.as_secs_f64(),
                    "end-processing"
                );
            }
            Notification::Log { task, message } => {
                tracing::info!(target: "tasque::events", task = %task.name(), "{message}");
            }
            Notification::Warn { task, message } => {
                tracing::warn!(target: "tasque::events", task = %task.name(), "{message}");
            }
            Notification::Error { task, message } => {
                tracing::error!(target: "tasque::events", task = %task.name(), "{message}");
            }
        }
    }
}

/// Sink that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: Notification) {}
}

/// Sink that records notifications in memory, in delivery order.
///
/// Intended for tests and introspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Notification>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded notification.
    #[must_use]
    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded notification kinds, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Notification::kind)
            .collect()
    }

    /// Drains and returns the recorded notifications.
    #[must_use]
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for MemorySink {
    fn notify(&self, event: Notification) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
