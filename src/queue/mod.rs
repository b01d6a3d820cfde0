//! Queue coordinator: enqueue/dequeue orchestration over a persistor.
//!
//! The coordinator owns the uniqueness policy and lifecycle event
//! emission and delegates everything else. Storage failures propagate
//! unchanged - retry is a task-level concept, not a storage-level one.

use std::sync::Arc;

use crate::events::{EventSink, Notification, TracingSink};
use crate::models::{Priority, Task, TaskBuilder, TaskError};
use crate::persistor::{Persistor, PersistorError};

/// Failure of the build-and-enqueue convenience.
#[derive(Debug, thiserror::Error)]
pub enum CreateTaskError {
    /// The task failed validation.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The enqueue hit a storage failure.
    #[error(transparent)]
    Persistor(#[from] PersistorError),
}

/// Coordinates producers, workers and the storage backend.
///
/// Cheap to clone; clones share the persistor and sink. Both
/// collaborators are injected at construction, so tasks, workers and
/// handlers all operate on an explicit queue instance rather than
/// process-wide state.
#[derive(Clone)]
pub struct Queue {
    persistor: Arc<dyn Persistor>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl Queue {
    /// Creates a queue over the given persistor, with notifications
    /// going to a [`TracingSink`].
    #[must_use]
    pub fn new(persistor: Arc<dyn Persistor>) -> Self {
        Self::with_sink(persistor, Arc::new(TracingSink))
    }

    /// Creates a queue with an explicit notification sink.
    #[must_use]
    pub fn with_sink(persistor: Arc<dyn Persistor>, sink: Arc<dyn EventSink>) -> Self {
        Self { persistor, sink }
    }

    /// The storage backend.
    #[must_use]
    pub fn persistor(&self) -> &Arc<dyn Persistor> {
        &self.persistor
    }

    /// The notification sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Enqueues a task.
    ///
    /// For a unique task, the enqueue is suppressed when a task with the
    /// same fingerprint is already pending, unless `force` is set. The
    /// check here is advisory (a point-in-time read); the persistor makes
    /// the at-most-one guarantee atomically on its own `add_task`.
    ///
    /// Emits an `add-task` notification carrying `is_retry` on an actual
    /// enqueue.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures unchanged.
    pub async fn add_task(
        &self,
        task: &Task,
        force: bool,
        is_retry: bool,
    ) -> Result<(), PersistorError> {
        if !force {
            if let Some(fingerprint) = task.fingerprint() {
                let pending = self.persistor.get_tasks(None).await?;
                let duplicate = pending
                    .iter()
                    .any(|stored| stored.fingerprint().as_deref() == Some(fingerprint.as_str()));
                if duplicate {
                    tracing::debug!(
                        task = %task.name(),
                        fingerprint = %fingerprint,
                        "Suppressed duplicate unique task"
                    );
                    return Ok(());
                }
            }
        }

        self.persistor.add_task(task, force).await?;
        self.sink.notify(Notification::AddTask {
            task: task.clone(),
            is_retry,
        });
        Ok(())
    }

    /// Builds a task and enqueues it in one call.
    ///
    /// The producer convenience: validation and the initial enqueue in a
    /// single step, returning the enqueued task.
    ///
    /// # Errors
    ///
    /// Returns `CreateTaskError` if the builder fails validation or the
    /// enqueue hits a storage failure.
    pub async fn create_task(&self, builder: TaskBuilder) -> Result<Task, CreateTaskError> {
        let task = builder.build()?;
        self.add_task(&task, false, false).await?;
        Ok(task)
    }

    /// Claims the next eligible task, optionally filtered by priority.
    ///
    /// Eligibility, ordering and claim atomicity are persistor
    /// responsibilities; this is a pass-through.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures unchanged.
    pub async fn get_task(
        &self,
        priority: Option<Priority>,
    ) -> Result<Option<Task>, PersistorError> {
        self.persistor.get_task(priority).await
    }

    /// Non-destructive listing of eligible tasks.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures unchanged.
    pub async fn get_tasks(
        &self,
        priority: Option<Priority>,
    ) -> Result<Vec<Task>, PersistorError> {
        self.persistor.get_tasks(priority).await
    }

    /// Removes a task from storage. `is_taken` signals a removal after a
    /// successful claim-and-run rather than an administrative clear.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures unchanged.
    pub async fn clear_task(&self, task: &Task, is_taken: bool) -> Result<(), PersistorError> {
        self.persistor.clear_task(task, is_taken).await
    }

    /// Removes every task; returns whether the operation succeeded.
    ///
    /// # Errors
    ///
    /// Propagates persistor failures unchanged.
    pub async fn clear(&self) -> Result<bool, PersistorError> {
        self.persistor.clear().await
    }
}
