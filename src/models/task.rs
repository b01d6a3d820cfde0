use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::persistor::PersistorError;
use crate::queue::Queue;

use super::timeparse;

/// Method invoked on a handler when the task does not name one.
pub const DEFAULT_METHOD_NAME: &str = "run";

/// Priority of a task in the queue.
///
/// A total order used only to bias dequeue: `High` tasks are handed out
/// before `Normal`, and so on down to `Test`. Priority never affects
/// validation or retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Test priority, below everything else.
    Test,
    /// Low priority.
    Low,
    /// Normal priority, the default.
    Normal,
    /// High priority, dequeued first.
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// All priority levels, lowest first.
    pub const ALL: &'static [Self] = &[Self::Test, Self::Low, Self::Normal, Self::High];

    /// Numeric level: `Test`=0, `Low`=1, `Normal`=2, `High`=3.
    #[must_use]
    pub const fn level(&self) -> u8 {
        match self {
            Self::Test => 0,
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
        }
    }

    /// Lowercase string form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Self::Test),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(()),
        }
    }
}

/// Validation errors raised while constructing or mutating a task.
///
/// These are fatal to the construction call only; nothing is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task name contains characters outside the accepted set.
    #[error("task name may contain only alphanumerics, spaces, slashes, underscores and dashes: {0:?}")]
    InvalidName(String),

    /// The method name does not match `[a-z][A-Za-z0-9_]+`.
    #[error("method name must start with a lowercase letter followed by alphanumerics or underscores: {0:?}")]
    InvalidMethodName(String),
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '\\' | ' ' | '_' | '-'))
}

fn valid_method_name(method: &str) -> bool {
    let bytes = method.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_lowercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

/// A unit of work in the queue.
///
/// Tasks carry the handler name, positional data, a priority, and the
/// scheduling metadata the queue and workers act on: an optional unique
/// key (deduplication), an optional delay, and an optional retry budget.
///
/// The name and method name are validated on every write; the remaining
/// fields are free-form. `last_error` is observability-only and is not
/// persisted with the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    name: String,
    method_name: String,
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    unique_key: Option<String>,
    #[serde(default)]
    retries_remaining: Option<u32>,
    #[serde(default)]
    retries_original: Option<u32>,
    #[serde(default)]
    retry_delta: Option<String>,
    #[serde(default)]
    delay_till: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_error: String,
}

impl Task {
    /// Creates a task with the given name and positional data.
    ///
    /// The name may embed a method name using the `Name::method` shorthand,
    /// which is split out into the task's method name.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` if the name or embedded method name fails
    /// validation.
    pub fn new(name: impl Into<String>, data: Vec<Value>) -> Result<Self, TaskError> {
        let mut task = Self {
            name: String::new(),
            method_name: DEFAULT_METHOD_NAME.to_string(),
            data,
            priority: Priority::default(),
            unique_key: None,
            retries_remaining: None,
            retries_original: None,
            retry_delta: None,
            delay_till: None,
            last_error: String::new(),
        };
        task.set_name(name)?;
        Ok(task)
    }

    /// Creates a builder for fluent task construction.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the task name, splitting out a `Name::method` shorthand.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` if the name or embedded method name is invalid.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<&mut Self, TaskError> {
        let raw = name.into();
        let (name, method) = match raw.split_once("::") {
            Some((n, m)) if !n.is_empty() => (n.to_string(), Some(m.to_string())),
            _ => (raw, None),
        };

        if !valid_name(&name) {
            return Err(TaskError::InvalidName(name));
        }
        if let Some(method) = method {
            self.set_method_name(method)?;
        }
        self.name = name;
        Ok(self)
    }

    /// Returns the method name invoked on the resolved handler.
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Sets the method name.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::InvalidMethodName` if it fails validation.
    pub fn set_method_name(&mut self, method: impl Into<String>) -> Result<&mut Self, TaskError> {
        let method = method.into();
        if !valid_method_name(&method) {
            return Err(TaskError::InvalidMethodName(method));
        }
        self.method_name = method;
        Ok(self)
    }

    /// Returns the positional data passed to the handler.
    #[must_use]
    pub fn data(&self) -> &[Value] {
        &self.data
    }

    /// Replaces the positional data.
    pub fn set_data(&mut self, data: Vec<Value>) -> &mut Self {
        self.data = data;
        self
    }

    /// Returns the task priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Sets the task priority.
    pub fn set_priority(&mut self, priority: Priority) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Returns the unique key, if the task is unique.
    #[must_use]
    pub fn unique_key(&self) -> Option<&str> {
        self.unique_key.as_deref()
    }

    /// Marks the task unique under the given key.
    pub fn set_unique_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.unique_key = Some(key.into());
        self
    }

    /// A task is unique iff a unique key is set.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique_key.is_some()
    }

    /// Deduplication fingerprint: hex SHA-256 of the name and unique key.
    ///
    /// `None` for non-unique tasks. Stable for the task's lifetime, since
    /// it derives from the immutable name and unique key.
    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        let key = self.unique_key.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(key.as_bytes());
        Some(hex::encode(hasher.finalize()))
    }

    /// Remaining automatic-retry budget; `None` means no retry policy.
    #[must_use]
    pub const fn retries_remaining(&self) -> Option<u32> {
        self.retries_remaining
    }

    /// Retry budget as originally configured.
    #[must_use]
    pub const fn retries_original(&self) -> Option<u32> {
        self.retries_original
    }

    /// Configures the retry policy, snapshotting the original count.
    pub fn set_retries(&mut self, retries: Option<u32>) -> &mut Self {
        self.retries_remaining = retries;
        self.retries_original = retries;
        self
    }

    /// Relative-time expression applied after an automatic retry.
    #[must_use]
    pub fn retry_delta(&self) -> Option<&str> {
        self.retry_delta.as_deref()
    }

    /// Sets the retry backoff expression (e.g. `"+10 minutes"`).
    ///
    /// An expression that does not parse is discarded, leaving no delta.
    pub fn set_retry_delta(&mut self, delta: impl Into<String>) -> &mut Self {
        let delta = delta.into();
        self.retry_delta = timeparse::parse_delta(&delta).map(|_| delta);
        self
    }

    /// Instant before which the task is ineligible for dequeue.
    #[must_use]
    pub const fn delay_till(&self) -> Option<DateTime<Utc>> {
        self.delay_till
    }

    /// Delays the task until the given absolute instant.
    pub fn set_delay_till(&mut self, till: DateTime<Utc>) -> &mut Self {
        self.delay_till = Some(till);
        self
    }

    /// Delays the task by a time expression resolved against now.
    ///
    /// Accepts absolute timestamps, a time of day, or a relative delta
    /// (see [`timeparse::resolve`]). An expression that does not parse
    /// clears the delay.
    pub fn set_delay(&mut self, expr: &str) -> &mut Self {
        self.delay_till = timeparse::resolve(expr, Utc::now());
        self
    }

    /// Whether the delay (if any) has elapsed at `now`.
    #[must_use]
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.delay_till.map_or(true, |till| now >= till)
    }

    /// Most recent failure diagnostic.
    #[must_use]
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Records a failure diagnostic.
    pub fn set_last_error(&mut self, error: impl Into<String>) -> &mut Self {
        self.last_error = error.into();
        self
    }

    /// Consumes one retry from the budget.
    ///
    /// Returns false without touching anything when no policy is set or
    /// the budget is spent; the decrement happens at most once per call.
    fn consume_retry(&mut self) -> bool {
        match self.retries_remaining {
            None | Some(0) => false,
            Some(n) => {
                self.retries_remaining = Some(n - 1);
                true
            }
        }
    }

    /// Automatic-failure retry path: decrement the budget and re-enqueue.
    ///
    /// Returns `Ok(false)` without re-enqueueing when there is no retry
    /// policy or the budget is exhausted; callers give up (and should
    /// invoke their failed-retry hook). Otherwise the retry backoff is
    /// applied (`delay_till` becomes now + `retry_delta` unless an
    /// explicit future delay is already set) and the task re-enters the
    /// queue as a retry.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures from the enqueue.
    pub async fn re_create(&mut self, queue: &Queue, force: bool) -> Result<bool, PersistorError> {
        if !self.consume_retry() {
            return Ok(false);
        }

        let now = Utc::now();
        let future_delay = self.delay_till.is_some_and(|till| till >= now);
        if !future_delay {
            if let Some(delta) = self.retry_delta.clone() {
                self.set_delay(&delta);
            }
        }

        queue.add_task(self, force, true).await?;
        Ok(true)
    }

    /// Explicit reschedule path: restore the retry budget and re-enqueue.
    ///
    /// Unlike [`re_create`](Self::re_create), the budget is reset to its
    /// originally configured value and there is no exhaustion check.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures from the enqueue.
    pub async fn re_schedule(&mut self, queue: &Queue, force: bool) -> Result<bool, PersistorError> {
        self.retries_remaining = self.retries_original;
        queue.add_task(self, force, false).await?;
        Ok(true)
    }
}

/// Fluent builder for [`Task`].
///
/// All validation happens in [`build`](Self::build), so the chain itself
/// is infallible.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    method_name: Option<String>,
    data: Vec<Value>,
    priority: Priority,
    unique_key: Option<String>,
    retries: Option<u32>,
    retry_delta: Option<String>,
    delay_expr: Option<String>,
    delay_till: Option<DateTime<Utc>>,
}

impl TaskBuilder {
    /// Creates a builder for a task with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method_name: None,
            data: Vec::new(),
            priority: Priority::default(),
            unique_key: None,
            retries: None,
            retry_delta: None,
            delay_expr: None,
            delay_till: None,
        }
    }

    /// Sets the method name to invoke on the handler.
    #[must_use]
    pub fn method_name(mut self, method: impl Into<String>) -> Self {
        self.method_name = Some(method.into());
        self
    }

    /// Sets the positional data.
    #[must_use]
    pub fn data(mut self, data: Vec<Value>) -> Self {
        self.data = data;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the task unique under the given key.
    #[must_use]
    pub fn unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    /// Configures the automatic-retry budget.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the retry backoff expression.
    #[must_use]
    pub fn retry_delta(mut self, delta: impl Into<String>) -> Self {
        self.retry_delta = Some(delta.into());
        self
    }

    /// Delays the task by a time expression resolved at build time.
    #[must_use]
    pub fn delay(mut self, expr: impl Into<String>) -> Self {
        self.delay_expr = Some(expr.into());
        self
    }

    /// Delays the task until an absolute instant.
    #[must_use]
    pub const fn delay_till(mut self, till: DateTime<Utc>) -> Self {
        self.delay_till = Some(till);
        self
    }

    /// Builds the task, validating the name and method name.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` if the name or method name is invalid.
    pub fn build(self) -> Result<Task, TaskError> {
        let mut task = Task::new(self.name, self.data)?;
        if let Some(method) = self.method_name {
            task.set_method_name(method)?;
        }
        task.set_priority(self.priority);
        if let Some(key) = self.unique_key {
            task.set_unique_key(key);
        }
        task.set_retries(self.retries);
        if let Some(delta) = self.retry_delta {
            task.set_retry_delta(delta);
        }
        if let Some(expr) = self.delay_expr {
            task.set_delay(&expr);
        }
        if let Some(till) = self.delay_till {
            task.set_delay_till(till);
        }
        Ok(task)
    }
}
