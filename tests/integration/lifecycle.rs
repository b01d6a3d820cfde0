//! Enqueue, dequeue, uniqueness and delay behavior end to end.

use chrono::{Duration as ChronoDuration, Utc};
use tasque::{Priority, Task};

use crate::common::{memory_queue, task};

#[tokio::test]
async fn test_enqueue_then_dequeue_by_priority() {
    let (queue, _persistor, _sink) = memory_queue();

    let normal = task("send-email");
    queue.add_task(&normal, false, false).await.unwrap();

    // Wrong priority filter sees nothing
    assert!(queue.get_task(Some(Priority::High)).await.unwrap().is_none());

    // Matching filter claims the task
    let claimed = queue.get_task(Some(Priority::Normal)).await.unwrap().unwrap();
    assert_eq!(claimed.name(), "send-email");

    // The claim removed it
    assert!(queue.get_task(Some(Priority::Normal)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_task_removes_pending_work() {
    let (queue, _persistor, _sink) = memory_queue();

    let job = task("send-email");
    queue.add_task(&job, false, false).await.unwrap();
    queue.clear_task(&job, false).await.unwrap();

    assert!(queue.get_task(Some(Priority::Normal)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_higher_priority_dequeued_first() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut low = task("low-job");
    low.set_priority(Priority::Low);
    let mut high = task("high-job");
    high.set_priority(Priority::High);
    let normal = task("normal-job");

    queue.add_task(&low, false, false).await.unwrap();
    queue.add_task(&normal, false, false).await.unwrap();
    queue.add_task(&high, false, false).await.unwrap();

    assert_eq!(queue.get_task(None).await.unwrap().unwrap().name(), "high-job");
    assert_eq!(queue.get_task(None).await.unwrap().unwrap().name(), "normal-job");
    assert_eq!(queue.get_task(None).await.unwrap().unwrap().name(), "low-job");
}

#[tokio::test]
async fn test_insertion_order_within_priority() {
    let (queue, _persistor, _sink) = memory_queue();

    queue.add_task(&task("first"), false, false).await.unwrap();
    queue.add_task(&task("second"), false, false).await.unwrap();
    queue.add_task(&task("third"), false, false).await.unwrap();

    assert_eq!(queue.get_task(None).await.unwrap().unwrap().name(), "first");
    assert_eq!(queue.get_task(None).await.unwrap().unwrap().name(), "second");
    assert_eq!(queue.get_task(None).await.unwrap().unwrap().name(), "third");
}

#[tokio::test]
async fn test_unique_task_dedup_and_force() {
    let (queue, _persistor, _sink) = memory_queue();

    let unique = Task::builder("sync-account")
        .unique_key("account-42")
        .build()
        .unwrap();

    queue.add_task(&unique, false, false).await.unwrap();
    queue.add_task(&unique, false, false).await.unwrap();
    assert_eq!(queue.get_tasks(None).await.unwrap().len(), 1);

    // Forcing bypasses the fingerprint check
    queue.add_task(&unique, true, false).await.unwrap();
    assert_eq!(queue.get_tasks(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delayed_task_excluded_until_due() {
    let (queue, persistor, _sink) = memory_queue();

    let mut delayed = task("reminder");
    delayed.set_delay_till(Utc::now() + ChronoDuration::hours(1));
    queue.add_task(&delayed, false, false).await.unwrap();

    // Stored but invisible while the delay is pending
    assert_eq!(persistor.len(), 1);
    assert!(queue.get_task(None).await.unwrap().is_none());
    assert!(queue.get_tasks(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_elapsed_delay_makes_task_eligible() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut due = task("reminder");
    due.set_delay_till(Utc::now() - ChronoDuration::seconds(1));
    queue.add_task(&due, false, false).await.unwrap();

    assert_eq!(queue.get_tasks(None).await.unwrap().len(), 1);
    assert!(queue.get_task(None).await.unwrap().is_some());
}

#[tokio::test]
async fn test_clear_empties_queue() {
    let (queue, persistor, _sink) = memory_queue();

    queue.add_task(&task("a"), false, false).await.unwrap();
    queue.add_task(&task("b"), false, false).await.unwrap();

    assert!(queue.clear().await.unwrap());
    assert!(persistor.is_empty());
}

#[tokio::test]
async fn test_concurrent_claims_never_share_a_task() {
    let (queue, _persistor, _sink) = memory_queue();

    queue.add_task(&task("one"), false, false).await.unwrap();
    queue.add_task(&task("two"), false, false).await.unwrap();

    let (a, b) = tokio::join!(queue.get_task(None), queue.get_task(None));
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    assert_ne!(a.name(), b.name());
    assert!(queue.get_task(None).await.unwrap().is_none());
}
