//! Handler resolution and dispatch.
//!
//! A task's name resolves to a handler registered at startup; no runtime
//! reflection. Two dispatch shapes exist: a stateful [`RunnableTask`]
//! that receives the method name and a [`RunContext`], and a bare
//! [`MethodTable`] whose entries take the task data directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::events::Notification;
use crate::models::Task;
use crate::persistor::PersistorError;
use crate::queue::Queue;
use crate::schedule::{next_occurrence, RecurrenceUnit, ScheduleError};

/// Derives the registry key from a task name.
///
/// Names containing a namespace separator (`\` or `/`) are treated as
/// fully qualified, with separators normalized to `::`. Anything else is
/// normalized kebab/snake style: split on spaces, dashes and
/// underscores, lowercase, then title-case each word and concatenate.
///
/// ```
/// use tasque::worker::handler_key;
///
/// assert_eq!(handler_key("send-email"), "SendEmail");
/// assert_eq!(handler_key("reports/nightly"), "reports::nightly");
/// ```
#[must_use]
pub fn handler_key(name: &str) -> String {
    if name.contains('\\') || name.contains('/') {
        return name.replace(['\\', '/'], "::");
    }

    name.split([' ', '-', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Failure raised by handler code during execution.
///
/// Captured into the task's `last_error` by the worker and never
/// propagated out of the worker loop; whether to retry is the handler's
/// own decision, made through [`RunContext::re_create`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionError(String);

impl ExecutionError {
    /// Creates an execution error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<PersistorError> for ExecutionError {
    fn from(error: PersistorError) -> Self {
        Self(error.to_string())
    }
}

/// Why a dispatch did not complete.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered under the derived key. The task remains
    /// in storage with its last state.
    #[error("no handler registered for {key:?} (task {name:?})")]
    NoHandler {
        /// The task name the key was derived from.
        name: String,
        /// The derived registry key.
        key: String,
    },

    /// The resolved handler has no method with the task's method name.
    ///
    /// Fatal on both dispatch shapes; a silent no-op would hide
    /// scheduling bugs.
    #[error("handler {key:?} has no method {method:?}")]
    UnknownMethod {
        /// The derived registry key.
        key: String,
        /// The missing method name.
        method: String,
    },

    /// The handler ran and failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl DispatchError {
    /// Short reason label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NoHandler { .. } => "no_handler",
            Self::UnknownMethod { .. } => "unknown_method",
            Self::Execution(_) => "execution",
        }
    }
}

/// Combined error for [`RunContext::re_schedule_at`].
#[derive(Debug, thiserror::Error)]
pub enum RescheduleError {
    /// The recurrence rule could not be evaluated.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// The re-enqueue hit a storage failure.
    #[error(transparent)]
    Persistor(#[from] PersistorError),
}

/// Execution context handed to a [`RunnableTask`].
///
/// Gives handler code mutable access to its task, the queue for retry
/// and reschedule decisions, and the log hooks that feed the
/// notification boundary.
pub struct RunContext<'a> {
    queue: &'a Queue,
    task: &'a mut Task,
}

impl<'a> RunContext<'a> {
    /// Creates a context for the given task.
    pub fn new(queue: &'a Queue, task: &'a mut Task) -> Self {
        Self { queue, task }
    }

    /// The task being executed.
    #[must_use]
    pub fn task(&self) -> &Task {
        self.task
    }

    /// Mutable access to the task.
    pub fn task_mut(&mut self) -> &mut Task {
        self.task
    }

    /// The queue the task came from.
    #[must_use]
    pub const fn queue(&self) -> &Queue {
        self.queue
    }

    /// Automatic retry: decrements the budget and re-enqueues.
    ///
    /// Returns `Ok(false)` when the budget is spent - the caller should
    /// give up, typically via its
    /// [`failed_re_create`](RunnableTask::failed_re_create) hook.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures from the enqueue.
    pub async fn re_create(&mut self, force: bool) -> Result<bool, PersistorError> {
        self.task.re_create(self.queue, force).await
    }

    /// Manual reschedule: restores the retry budget and re-enqueues.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures from the enqueue.
    pub async fn re_schedule(&mut self, force: bool) -> Result<bool, PersistorError> {
        self.task.re_schedule(self.queue, force).await
    }

    /// Reschedules the task onto the next occurrence of a recurrence
    /// rule, returning the computed instant.
    ///
    /// # Errors
    ///
    /// Returns `RescheduleError` if the rule cannot be evaluated or the
    /// re-enqueue fails.
    pub async fn re_schedule_at(
        &mut self,
        time_expr: &str,
        unit: RecurrenceUnit,
    ) -> Result<DateTime<Utc>, RescheduleError> {
        let next = next_occurrence(time_expr, unit, Utc::now())?;
        self.task.set_delay_till(next);
        self.task.re_schedule(self.queue, false).await?;
        Ok(next)
    }

    /// Emits a `log` notification for this task.
    pub fn log(&self, message: impl Into<String>) {
        self.queue.sink().notify(Notification::Log {
            task: self.task.clone(),
            message: message.into(),
        });
    }

    /// Emits a `warn` notification for this task.
    pub fn warn(&self, message: impl Into<String>) {
        self.queue.sink().notify(Notification::Warn {
            task: self.task.clone(),
            message: message.into(),
        });
    }

    /// Records the message as the task's last error and emits an `error`
    /// notification.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.task.set_last_error(message.clone());
        self.queue.sink().notify(Notification::Error {
            task: self.task.clone(),
            message,
        });
    }
}

/// Outcome of a [`RunnableTask::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The named method ran to completion.
    Ran,
    /// The runnable has no method with that name. The dispatcher turns
    /// this into a fatal [`DispatchError::UnknownMethod`].
    UnknownMethod,
}

/// The stateful dispatch shape.
///
/// A fresh instance is built per dispatch; the worker calls
/// [`set_data`](Self::set_data) with the task's positional data, then
/// [`run`](Self::run) with the task's method name. The runnable
/// dispatches on the method name itself, usually with a `match`:
///
/// ```ignore
/// #[async_trait]
/// impl RunnableTask for SendEmail {
///     fn set_data(&mut self, data: Vec<Value>) {
///         self.data = data;
///     }
///
///     async fn run(
///         &mut self,
///         method_name: &str,
///         ctx: &mut RunContext<'_>,
///     ) -> Result<RunOutcome, ExecutionError> {
///         match method_name {
///             "run" => self.deliver(ctx).await.map(|()| RunOutcome::Ran),
///             _ => Ok(RunOutcome::UnknownMethod),
///         }
///     }
/// }
/// ```
///
/// Handlers own the retry decision. The usual failure pattern is:
///
/// ```ignore
/// if !ctx.re_create(false).await? {
///     let task = ctx.task().clone();
///     self.failed_re_create(&task);
/// }
/// ```
#[async_trait]
pub trait RunnableTask: Send {
    /// Receives the task's positional data before `run`.
    fn set_data(&mut self, data: Vec<Value>);

    /// Executes the method named by the task.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError` for handler-domain failures.
    async fn run(
        &mut self,
        method_name: &str,
        ctx: &mut RunContext<'_>,
    ) -> Result<RunOutcome, ExecutionError>;

    /// Invoked by handler code when [`RunContext::re_create`] reports an
    /// exhausted retry budget. Default: no-op.
    fn failed_re_create(&mut self, _task: &Task) {}
}

/// Factory building a fresh runnable per dispatch.
pub type RunnableFactory = Box<dyn Fn() -> Box<dyn RunnableTask> + Send + Sync>;

/// An async method taking the task's positional data.
pub type DirectMethod =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<(), ExecutionError>> + Send + Sync>;

/// The bare dispatch shape: a table of named async methods.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, DirectMethod>,
}

impl MethodTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method under the given name, replacing any previous entry.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ExecutionError>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |data| Box::pin(f(data))));
        self
    }

    /// Looks up a method by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DirectMethod> {
        self.methods.get(name)
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        f.debug_struct("MethodTable").field("methods", &names).finish()
    }
}

/// A registered handler: one of the two dispatch shapes.
pub enum Handler {
    /// Stateful handler built per dispatch.
    Runnable(RunnableFactory),
    /// Bare method table.
    Direct(MethodTable),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Runnable(_) => f.write_str("Handler::Runnable"),
            Self::Direct(table) => f.debug_tuple("Handler::Direct").field(table).finish(),
        }
    }
}

/// Registry mapping task names to handlers, resolved at startup.
///
/// Registration normalizes names through [`handler_key`], so
/// `"send-email"`, `"send_email"` and `"SendEmail"` all address the same
/// handler.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a task name, replacing any previous one.
    pub fn register(&mut self, name: &str, handler: Handler) {
        self.handlers.insert(handler_key(name), handler);
    }

    /// Registers a runnable factory for a task name.
    pub fn runnable<F, R>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: RunnableTask + 'static,
    {
        self.register(
            name,
            Handler::Runnable(Box::new(move || Box::new(factory()))),
        );
    }

    /// Registers a method table for a task name.
    pub fn direct(&mut self, name: &str, table: MethodTable) {
        self.register(name, Handler::Direct(table));
    }

    /// Looks up a handler by pre-derived registry key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Handler> {
        self.handlers.get(key)
    }

    /// Resolves a handler from a task name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Handler> {
        self.get(&handler_key(name))
    }

    /// Whether a handler is registered for the task name.
    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Resolves the task's handler and invokes it.
///
/// # Errors
///
/// Returns `DispatchError` when no handler matches the derived key, the
/// method name is unknown on the resolved handler, or the handler fails.
pub async fn dispatch(
    registry: &HandlerRegistry,
    queue: &Queue,
    task: &mut Task,
) -> Result<(), DispatchError> {
    let key = handler_key(task.name());
    let Some(handler) = registry.get(&key) else {
        return Err(DispatchError::NoHandler {
            name: task.name().to_string(),
            key,
        });
    };

    match handler {
        Handler::Runnable(factory) => {
            let mut runnable = factory();
            runnable.set_data(task.data().to_vec());
            let method = task.method_name().to_string();
            let mut ctx = RunContext::new(queue, task);
            match runnable.run(&method, &mut ctx).await? {
                RunOutcome::Ran => Ok(()),
                RunOutcome::UnknownMethod => Err(DispatchError::UnknownMethod { key, method }),
            }
        }
        Handler::Direct(table) => {
            let Some(method) = table.get(task.method_name()) else {
                return Err(DispatchError::UnknownMethod {
                    key,
                    method: task.method_name().to_string(),
                });
            };
            method.as_ref()(task.data().to_vec()).await?;
            Ok(())
        }
    }
}
