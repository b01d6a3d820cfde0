//! tasque - persistence-agnostic task queue
//!
//! Producers enqueue named units of work with a priority, an optional
//! uniqueness key, an optional delay, and an optional retry budget.
//! Workers poll a shared persistor, claim eligible tasks, dispatch them
//! to handlers resolved from the task name, and let handler code decide
//! between retry (with backoff) and giving up. A calendar recurrence
//! engine computes "next occurrence" instants for periodic rescheduling.
//!
//! Storage lives entirely behind the [`Persistor`] trait: the persistor
//! owns claim atomicity, durability and priority-ordered retrieval. The
//! crate ships a [`MemoryPersistor`] reference backend; anything durable
//! (file, database, object store) is an external implementation of the
//! same contract.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tasque::{HandlerRegistry, MemoryPersistor, MethodTable, Queue, Task, Worker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Queue::new(Arc::new(MemoryPersistor::new()));
//!
//! let task = Task::builder("send-email")
//!     .data(vec![serde_json::json!({"to": "user@example.com"})])
//!     .retries(3)
//!     .retry_delta("+10 minutes")
//!     .build()?;
//! queue.add_task(&task, false, false).await?;
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.direct(
//!     "send-email",
//!     MethodTable::new().method("run", |data| async move {
//!         println!("sending {data:?}");
//!         Ok(())
//!     }),
//! );
//!
//! let mut worker = Worker::new(queue, handlers);
//! while !worker.is_expired() {
//!     worker.run().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod models;
pub mod persistor;
pub mod queue;
pub mod schedule;
pub mod worker;

pub use config::{load_config, ConfigError, TasqueConfig};
pub use events::{EventSink, MemorySink, Notification, NullSink, TracingSink};
pub use models::{Priority, Task, TaskBuilder, TaskError, DEFAULT_METHOD_NAME};
pub use persistor::{MemoryPersistor, Persistor, PersistorError, PersistorOptions};
pub use queue::{CreateTaskError, Queue};
pub use schedule::{next_occurrence, next_occurrence_from_now, RecurrenceUnit, ScheduleError};
pub use worker::{
    dispatch, handler_key, DispatchError, ExecutionError, FlagSignal, Handler, HandlerRegistry,
    MethodTable, RescheduleError, RunContext, RunOutcome, RunnableTask, WakeSignal, Worker,
    WorkerConfig,
};
