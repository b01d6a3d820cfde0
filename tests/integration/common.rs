//! Common test utilities.

use std::sync::Arc;

use tasque::{MemoryPersistor, MemorySink, Queue, Task};

/// Builds a queue over a fresh in-memory persistor with a recording
/// sink, returning all three so tests can inspect storage and events.
pub fn memory_queue() -> (Queue, Arc<MemoryPersistor>, Arc<MemorySink>) {
    let persistor = Arc::new(MemoryPersistor::new());
    let sink = Arc::new(MemorySink::new());
    let queue = Queue::with_sink(persistor.clone(), sink.clone());
    (queue, persistor, sink)
}

/// Builds a plain task with no data.
pub fn task(name: &str) -> Task {
    Task::new(name, vec![]).expect("valid task name")
}
