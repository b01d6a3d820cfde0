//! Worker loop end to end: dispatch, failure capture, sleep, wake and
//! expiry. Timer-sensitive tests run on a paused tokio clock.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasque::{
    ExecutionError, FlagSignal, HandlerRegistry, MethodTable, Notification, Priority, RunContext,
    RunOutcome, RunnableTask, Task, Worker, WorkerConfig,
};
use tokio::time::Instant;

use crate::common::{memory_queue, task};

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        interval: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_worker_executes_direct_handler() {
    let (queue, _persistor, sink) = memory_queue();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();

    let mut handlers = HandlerRegistry::new();
    handlers.direct(
        "count-up",
        MethodTable::new().method("run", move |data: Vec<Value>| {
            let calls = calls_clone.clone();
            async move {
                assert_eq!(data, vec![serde_json::json!(5)]);
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    let job = Task::new("count-up", vec![serde_json::json!(5)]).unwrap();
    queue.add_task(&job, false, false).await.unwrap();

    let mut worker = Worker::with_config(queue, handlers, fast_config());
    let ran = worker.run().await.unwrap();

    assert_eq!(ran.unwrap().name(), "count-up");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        sink.kinds(),
        vec!["add-task", "start-processing", "end-processing"]
    );
}

#[tokio::test]
async fn test_worker_returns_none_when_idle() {
    let (queue, _persistor, sink) = memory_queue();
    let mut worker = Worker::with_config(queue, HandlerRegistry::new(), fast_config());

    assert!(worker.run().await.unwrap().is_none());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn test_worker_captures_handler_failure() {
    let (queue, _persistor, sink) = memory_queue();

    let mut handlers = HandlerRegistry::new();
    handlers.direct(
        "doomed",
        MethodTable::new().method("run", |_data: Vec<Value>| async {
            Err(ExecutionError::new("disk on fire"))
        }),
    );

    queue.add_task(&task("doomed"), false, false).await.unwrap();

    let mut worker = Worker::with_config(queue, handlers, fast_config());
    // The failure does not propagate out of run()
    let ran = worker.run().await.unwrap().unwrap();

    assert_eq!(ran.last_error(), "disk on fire");
    let kinds = sink.kinds();
    assert_eq!(
        kinds,
        vec!["add-task", "start-processing", "error", "end-processing"]
    );
}

#[tokio::test]
async fn test_worker_records_missing_handler() {
    let (queue, _persistor, sink) = memory_queue();

    queue.add_task(&task("ghost"), false, false).await.unwrap();

    let mut worker = Worker::with_config(queue, HandlerRegistry::new(), fast_config());
    let ran = worker.run().await.unwrap().unwrap();

    assert!(ran.last_error().contains("no handler"));
    assert!(sink.kinds().contains(&"error"));
}

#[tokio::test]
async fn test_worker_priority_filter() {
    let (queue, _persistor, _sink) = memory_queue();

    queue.add_task(&task("normal-job"), false, false).await.unwrap();
    let mut high = task("high-job");
    high.set_priority(Priority::High);
    queue.add_task(&high, false, false).await.unwrap();

    let mut handlers = HandlerRegistry::new();
    handlers.direct(
        "high-job",
        MethodTable::new().method("run", |_| async { Ok(()) }),
    );

    let config = WorkerConfig {
        priority: Some(Priority::High),
        ..fast_config()
    };
    let mut worker = Worker::with_config(queue.clone(), handlers, config);

    // Only the high-priority task is picked up
    assert_eq!(worker.run().await.unwrap().unwrap().name(), "high-job");
    assert!(worker.run().await.unwrap().is_none());
    // The normal task is still pending
    assert_eq!(queue.get_tasks(None).await.unwrap().len(), 1);
}

struct FlakyJob {
    data: Vec<Value>,
    attempts: Arc<AtomicUsize>,
    gave_up: Arc<AtomicBool>,
}

#[async_trait]
impl RunnableTask for FlakyJob {
    fn set_data(&mut self, data: Vec<Value>) {
        self.data = data;
    }

    async fn run(
        &mut self,
        method_name: &str,
        ctx: &mut RunContext<'_>,
    ) -> Result<RunOutcome, ExecutionError> {
        match method_name {
            "run" => {
                assert!(self.data.is_empty());
                self.attempts.fetch_add(1, Ordering::SeqCst);
                ctx.error("upstream unavailable");
                if !ctx.re_create(false).await? {
                    let job = ctx.task().clone();
                    self.failed_re_create(&job);
                }
                Ok(RunOutcome::Ran)
            }
            _ => Ok(RunOutcome::UnknownMethod),
        }
    }

    fn failed_re_create(&mut self, _task: &Task) {
        self.gave_up.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_handler_driven_retry_until_exhaustion() {
    let (queue, persistor, sink) = memory_queue();
    let attempts = Arc::new(AtomicUsize::new(0));
    let gave_up = Arc::new(AtomicBool::new(false));

    let mut handlers = HandlerRegistry::new();
    let (attempts_ref, gave_up_ref) = (attempts.clone(), gave_up.clone());
    handlers.runnable("flaky-job", move || FlakyJob {
        data: Vec::new(),
        attempts: attempts_ref.clone(),
        gave_up: gave_up_ref.clone(),
    });

    let job = Task::builder("flaky-job").retries(1).build().unwrap();
    queue.add_task(&job, false, false).await.unwrap();

    let mut worker = Worker::with_config(queue, handlers, fast_config());

    // First attempt consumes the single retry and re-enqueues
    worker.run().await.unwrap().unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!gave_up.load(Ordering::SeqCst));

    // Second attempt finds the budget spent and gives up
    worker.run().await.unwrap().unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(gave_up.load(Ordering::SeqCst));
    assert!(persistor.is_empty());

    // One producer enqueue plus exactly one retry re-enqueue
    let retries = sink
        .events()
        .iter()
        .filter(|event| matches!(event, Notification::AddTask { is_retry: true, .. }))
        .count();
    assert_eq!(retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_worker_sleeps_full_interval() {
    let (queue, _persistor, _sink) = memory_queue();
    let config = WorkerConfig {
        interval: Duration::from_secs(5),
        ..Default::default()
    };
    let mut worker = Worker::with_config(queue, HandlerRegistry::new(), config);

    let before = Instant::now();
    worker.run().await.unwrap();
    assert_eq!(before.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_wake_signal_skips_sleep() {
    let (queue, _persistor, _sink) = memory_queue();
    let signal = Arc::new(FlagSignal::new());
    signal.wake();

    let config = WorkerConfig {
        interval: Duration::from_secs(60),
        ..Default::default()
    };
    let mut worker = Worker::with_config(queue, HandlerRegistry::new(), config)
        .with_wake_signal(signal);

    let before = Instant::now();
    worker.run().await.unwrap();
    // The pre-set signal is observed before the first tick
    assert_eq!(before.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_wake_signal_cuts_sleep_short() {
    let (queue, _persistor, _sink) = memory_queue();
    let signal = Arc::new(FlagSignal::new());

    let config = WorkerConfig {
        interval: Duration::from_secs(60),
        ..Default::default()
    };
    let mut worker = Worker::with_config(queue, HandlerRegistry::new(), config)
        .with_wake_signal(signal.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        signal.wake();
    });

    let before = Instant::now();
    worker.run().await.unwrap();
    // Observed on the next one-second tick after the signal
    assert_eq!(before.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_max_run_time_expires_worker() {
    let (queue, _persistor, _sink) = memory_queue();
    let config = WorkerConfig {
        interval: Duration::from_secs(60),
        max_run_time: Some(Duration::from_millis(2500)),
        ..Default::default()
    };
    let mut worker = Worker::with_config(queue, HandlerRegistry::new(), config);

    let before = Instant::now();
    assert!(worker.run().await.unwrap().is_none());
    // Sleep was abandoned on the first tick past the deadline
    assert_eq!(before.elapsed(), Duration::from_secs(3));
    assert!(worker.is_expired());

    // A terminal worker does not poll again
    let before = Instant::now();
    assert!(worker.run().await.unwrap().is_none());
    assert_eq!(before.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_busy_cycle_skips_sleep() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut handlers = HandlerRegistry::new();
    handlers.direct(
        "quick",
        MethodTable::new().method("run", |_| async { Ok(()) }),
    );
    queue.add_task(&task("quick"), false, false).await.unwrap();

    // Zero interval: any execution time at all covers it
    let mut worker = Worker::with_config(queue, handlers, fast_config());
    let started = std::time::Instant::now();
    worker.run().await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}
