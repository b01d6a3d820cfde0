//! Worker: the poll-sleep-execute state machine.
//!
//! A worker claims one eligible task per [`run`](Worker::run) call,
//! dispatches it through the handler registry, and then sleeps in
//! one-second ticks so it can observe its max-run-time deadline and an
//! external early-wake signal. Callers drive `run()` in their own loop
//! with their own exit conditions; the worker is not a background loop.

mod dispatch;

pub use dispatch::{
    dispatch, handler_key, DirectMethod, DispatchError, ExecutionError, Handler, HandlerRegistry,
    MethodTable, RescheduleError, RunContext, RunOutcome, RunnableFactory, RunnableTask,
};

use chrono::Utc;
use metrics::{counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::events::Notification;
use crate::models::{Priority, Task};
use crate::persistor::PersistorError;
use crate::queue::Queue;

/// Sleep up to 5 seconds between polls by default.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on the post-cycle sleep.
    pub interval: Duration,
    /// Total lifetime after which the worker stops picking up work.
    /// `None` means the worker never expires.
    pub max_run_time: Option<Duration>,
    /// Only process tasks of this priority; `None` takes any task.
    pub priority: Option<Priority>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_run_time: None,
            priority: None,
        }
    }
}

/// Signals a sleeping worker to resume early.
///
/// Polled once per second while the worker sleeps - for instance because
/// a producer just enqueued work for this process. Returning `true`
/// consumes the request; without a signal the worker always sleeps the
/// full interval. The transport behind the flag is up to the caller.
pub trait WakeSignal: Send + Sync {
    /// Whether this worker has been asked to resume early.
    fn should_wake(&self) -> bool;
}

/// Atomic-flag wake signal.
#[derive(Debug, Default)]
pub struct FlagSignal {
    requested: AtomicBool,
}

impl FlagSignal {
    /// Creates an unsignaled flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an early wake-up.
    pub fn wake(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

impl WakeSignal for FlagSignal {
    fn should_wake(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

/// Polls a queue and executes tasks through a handler registry.
///
/// Single-threaded and strictly sequential: poll, execute, settle,
/// sleep. Any number of workers may run against the same shared
/// persistor; the persistor's atomic claim keeps them from processing
/// the same task.
pub struct Worker {
    queue: Queue,
    handlers: HandlerRegistry,
    config: WorkerConfig,
    wake: Option<Arc<dyn WakeSignal>>,
    started_at: Instant,
    expired: bool,
}

impl Worker {
    /// Creates a worker with the default configuration.
    #[must_use]
    pub fn new(queue: Queue, handlers: HandlerRegistry) -> Self {
        Self::with_config(queue, handlers, WorkerConfig::default())
    }

    /// Creates a worker with an explicit configuration.
    #[must_use]
    pub fn with_config(queue: Queue, handlers: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers,
            config,
            wake: None,
            started_at: Instant::now(),
            expired: false,
        }
    }

    /// Attaches an early-wake signal.
    #[must_use]
    pub fn with_wake_signal(mut self, signal: Arc<dyn WakeSignal>) -> Self {
        self.wake = Some(signal);
        self
    }

    /// The worker configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The handler registry.
    #[must_use]
    pub const fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Whether the worker has exceeded its max run time and stopped
    /// picking up work.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.expired
    }

    fn deadline_exceeded(&self) -> bool {
        self.config
            .max_run_time
            .is_some_and(|max| self.started_at.elapsed() > max)
    }

    /// Runs one poll-execute-sleep cycle.
    ///
    /// Returns the task that ran, or `None` when no task was eligible or
    /// the worker has expired. Handler failures are captured into the
    /// task's `last_error` and the notification boundary; they never
    /// propagate out of this call, and the handler itself decides whether
    /// to retry. Storage failures do propagate.
    ///
    /// # Errors
    ///
    /// Returns `PersistorError` if polling the queue fails.
    pub async fn run(&mut self) -> Result<Option<Task>, PersistorError> {
        if self.expired || self.deadline_exceeded() {
            if !self.expired {
                tracing::info!("Worker exceeded max run time, stopping");
                self.expired = true;
            }
            return Ok(None);
        }

        let cycle_start = Instant::now();
        let start_time = Utc::now();

        let Some(mut task) = self.queue.get_task(self.config.priority).await? else {
            self.sleep(cycle_start).await;
            return Ok(None);
        };

        tracing::info!(
            task = %task.name(),
            method = %task.method_name(),
            priority = %task.priority(),
            "Processing task"
        );
        self.queue.sink().notify(Notification::StartProcessing {
            task: task.clone(),
            start_time,
        });

        match dispatch(&self.handlers, &self.queue, &mut task).await {
            Ok(()) => {
                counter!("tasque.tasks.completed", "task" => task.name().to_string())
                    .increment(1);
            }
            Err(error) => {
                counter!(
                    "tasque.tasks.failed",
                    "task" => task.name().to_string(),
                    "reason" => error.reason()
                )
                .increment(1);
                tracing::warn!(
                    task = %task.name(),
                    method = %task.method_name(),
                    error = %error,
                    "Task execution failed"
                );
                let message = error.to_string();
                task.set_last_error(message.clone());
                self.queue.sink().notify(Notification::Error {
                    task: task.clone(),
                    message,
                });
            }
        }

        let elapsed = cycle_start.elapsed();
        histogram!("tasque.task.duration_seconds", "task" => task.name().to_string())
            .record(elapsed.as_secs_f64());
        self.queue.sink().notify(Notification::EndProcessing {
            task: task.clone(),
            elapsed,
        });

        self.sleep(cycle_start).await;
        Ok(Some(task))
    }

    /// Sleeps out the remainder of the interval in one-second ticks.
    ///
    /// Each tick checks the max-run-time deadline (exceeded: the worker
    /// turns terminal) and the wake signal (set: the sleep is cut
    /// short). A cycle that already consumed the interval skips the
    /// sleep entirely.
    async fn sleep(&mut self, cycle_start: Instant) {
        let worked = cycle_start.elapsed();
        if worked >= self.config.interval {
            return;
        }

        let mut remaining = self.config.interval - worked;
        while !remaining.is_zero() {
            if self.deadline_exceeded() {
                tracing::info!("Worker exceeded max run time, stopping");
                self.expired = true;
                return;
            }
            if let Some(wake) = &self.wake {
                if wake.should_wake() {
                    tracing::debug!("Sleep cut short by wake signal");
                    return;
                }
            }
            let tick = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(tick).await;
            remaining = remaining.saturating_sub(tick);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .field("expired", &self.expired)
            .finish_non_exhaustive()
    }
}
