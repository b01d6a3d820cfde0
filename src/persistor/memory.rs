//! In-memory persistor: the reference backend.
//!
//! Tasks live in a mutex-guarded vector in insertion order. Claiming
//! removes the task under the lock, which is what makes the claim atomic;
//! durability is explicitly not provided.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::{Priority, Task};

use super::{Persistor, PersistorError, PersistorOptions};

/// Mutex-guarded in-memory task store.
#[derive(Debug, Default)]
pub struct MemoryPersistor {
    options: PersistorOptions,
    tasks: Mutex<Vec<Task>>,
}

impl MemoryPersistor {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks, eligible or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Identity for removal: the scheduling-relevant fields, ignoring
/// mutable diagnostics like the delay and last error.
fn same_task(a: &Task, b: &Task) -> bool {
    a.name() == b.name()
        && a.method_name() == b.method_name()
        && a.data() == b.data()
        && a.priority() == b.priority()
        && a.unique_key() == b.unique_key()
}

#[async_trait]
impl Persistor for MemoryPersistor {
    fn set_options(&mut self, options: PersistorOptions) {
        self.options = options;
    }

    fn options(&self) -> &PersistorOptions {
        &self.options
    }

    async fn add_task(&self, task: &Task, force: bool) -> Result<(), PersistorError> {
        let mut tasks = self.lock();
        if !force {
            if let Some(fingerprint) = task.fingerprint() {
                let duplicate = tasks
                    .iter()
                    .any(|stored| stored.fingerprint().as_deref() == Some(fingerprint.as_str()));
                if duplicate {
                    return Ok(());
                }
            }
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn clear_task(&self, task: &Task, _is_taken: bool) -> Result<(), PersistorError> {
        let mut tasks = self.lock();
        if let Some(index) = tasks.iter().position(|stored| same_task(stored, task)) {
            tasks.remove(index);
        }
        Ok(())
    }

    async fn get_task(&self, priority: Option<Priority>) -> Result<Option<Task>, PersistorError> {
        let now = Utc::now();
        let mut tasks = self.lock();

        let mut best: Option<(Priority, usize)> = None;
        for (index, task) in tasks.iter().enumerate() {
            if !task.is_eligible_at(now) {
                continue;
            }
            if priority.is_some_and(|p| task.priority() != p) {
                continue;
            }
            match best {
                Some((current, _)) if task.priority() <= current => {}
                _ => best = Some((task.priority(), index)),
            }
        }

        Ok(best.map(|(_, index)| tasks.remove(index)))
    }

    async fn get_tasks(&self, priority: Option<Priority>) -> Result<Vec<Task>, PersistorError> {
        let now = Utc::now();
        let tasks = self.lock();

        let mut eligible: Vec<Task> = tasks
            .iter()
            .filter(|task| task.is_eligible_at(now))
            .filter(|task| priority.map_or(true, |p| task.priority() == p))
            .cloned()
            .collect();
        // Stable sort keeps insertion order within a priority.
        eligible.sort_by_key(|task| std::cmp::Reverse(task.priority()));
        Ok(eligible)
    }

    async fn clear(&self) -> Result<bool, PersistorError> {
        self.lock().clear();
        Ok(true)
    }
}
