//! Storage abstraction behind the queue coordinator.
//!
//! The coordinator is a thin pass-through over this contract; everything
//! concurrency-sensitive lives here. A persistor alone is responsible
//! for the atomic claim on [`get_task`](Persistor::get_task) (no two
//! concurrent claimers receive the same task), durability of task state
//! across process restarts, and priority-ordered retrieval.
//!
//! The bundled [`MemoryPersistor`] is the reference implementation and
//! the backend the integration tests run against.

mod memory;

pub use memory::MemoryPersistor;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Priority, Task};

/// Backend-specific configuration, opaque to the core.
pub type PersistorOptions = serde_json::Map<String, Value>;

/// Storage failures, propagated unchanged through the coordinator.
///
/// There is no retry logic at this layer; retry is a task-level concept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistorError {
    /// The backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A task could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Contract a storage backend implements for the queue coordinator.
#[async_trait]
pub trait Persistor: Send + Sync {
    /// Applies backend-specific options. Recognized keys are up to the
    /// implementation; unknown keys are ignored.
    fn set_options(&mut self, options: PersistorOptions);

    /// Returns the current options.
    fn options(&self) -> &PersistorOptions;

    /// Stores a task.
    ///
    /// For a unique task the backend must guarantee at most one pending
    /// task per fingerprint unless `force` is set; a suppressed duplicate
    /// is not an error.
    async fn add_task(&self, task: &Task, force: bool) -> Result<(), PersistorError>;

    /// Removes a task. `is_taken` distinguishes a removal after a
    /// successful claim-and-run from an administrative clear.
    async fn clear_task(&self, task: &Task, is_taken: bool) -> Result<(), PersistorError>;

    /// Claims and returns the next eligible task, or `None`.
    ///
    /// Eligible: delay elapsed, and matching `priority` when given.
    /// Ordering: highest priority first, then insertion order. The claim
    /// must be atomic - concurrent callers never receive the same task.
    async fn get_task(&self, priority: Option<Priority>) -> Result<Option<Task>, PersistorError>;

    /// Non-destructive listing of eligible tasks, same filter and order
    /// as [`get_task`](Self::get_task).
    async fn get_tasks(&self, priority: Option<Priority>) -> Result<Vec<Task>, PersistorError>;

    /// Removes every task; returns whether the operation succeeded.
    async fn clear(&self) -> Result<bool, PersistorError>;
}
