//! Retry budget and reschedule semantics against a live queue.

use chrono::{Duration as ChronoDuration, Utc};
use tasque::{Notification, Task};

use crate::common::memory_queue;

#[tokio::test]
async fn test_re_create_without_policy_gives_up() {
    let (queue, persistor, _sink) = memory_queue();

    let mut job = Task::new("flaky", vec![]).unwrap();
    assert!(!job.re_create(&queue, false).await.unwrap());
    assert!(persistor.is_empty());
}

#[tokio::test]
async fn test_re_create_honors_budget_exactly() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut job = Task::builder("flaky").retries(2).build().unwrap();

    // Budget of two: succeeds twice, then reports exhaustion
    assert!(job.re_create(&queue, false).await.unwrap());
    assert!(job.re_create(&queue, false).await.unwrap());
    assert!(!job.re_create(&queue, false).await.unwrap());
    assert_eq!(job.retries_remaining(), Some(0));
}

#[tokio::test]
async fn test_re_create_emits_retry_notifications() {
    let (queue, _persistor, sink) = memory_queue();

    let mut job = Task::builder("flaky").retries(1).build().unwrap();
    queue.add_task(&job, false, false).await.unwrap();
    assert!(job.re_create(&queue, false).await.unwrap());

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        Notification::AddTask {
            is_retry: false,
            ..
        }
    ));
    assert!(matches!(&events[1], Notification::AddTask { is_retry: true, .. }));
}

#[tokio::test]
async fn test_re_create_applies_retry_delta() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut job = Task::builder("flaky")
        .retries(3)
        .retry_delta("+10 minutes")
        .build()
        .unwrap();

    let before = Utc::now();
    assert!(job.re_create(&queue, false).await.unwrap());

    let till = job.delay_till().expect("backoff should set a delay");
    assert!(till >= before + ChronoDuration::minutes(9));
    assert!(till <= before + ChronoDuration::minutes(11));
}

#[tokio::test]
async fn test_re_create_keeps_future_delay() {
    let (queue, _persistor, _sink) = memory_queue();

    let future = Utc::now() + ChronoDuration::hours(6);
    let mut job = Task::builder("flaky")
        .retries(3)
        .retry_delta("+10 minutes")
        .delay_till(future)
        .build()
        .unwrap();

    assert!(job.re_create(&queue, false).await.unwrap());
    // An explicit future delay is not replaced by the backoff
    assert_eq!(job.delay_till(), Some(future));
}

#[tokio::test]
async fn test_re_create_replaces_elapsed_delay() {
    let (queue, _persistor, _sink) = memory_queue();

    let past = Utc::now() - ChronoDuration::hours(1);
    let mut job = Task::builder("flaky")
        .retries(3)
        .retry_delta("+10 minutes")
        .delay_till(past)
        .build()
        .unwrap();

    assert!(job.re_create(&queue, false).await.unwrap());
    let till = job.delay_till().unwrap();
    assert!(till > Utc::now());
}

#[tokio::test]
async fn test_re_schedule_resets_budget() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut job = Task::builder("nightly").retries(3).build().unwrap();

    // Deplete the budget
    assert!(job.re_create(&queue, false).await.unwrap());
    assert!(job.re_create(&queue, false).await.unwrap());
    assert_eq!(job.retries_remaining(), Some(1));

    assert!(job.re_schedule(&queue, true).await.unwrap());
    assert_eq!(job.retries_remaining(), Some(3));
}

#[tokio::test]
async fn test_re_schedule_is_not_a_retry() {
    let (queue, _persistor, sink) = memory_queue();

    let mut job = Task::builder("nightly").retries(1).build().unwrap();
    assert!(job.re_schedule(&queue, false).await.unwrap());

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        Notification::AddTask {
            is_retry: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_exhausted_unique_task_can_still_reschedule() {
    let (queue, _persistor, _sink) = memory_queue();

    let mut job = Task::builder("sync-account")
        .unique_key("account-42")
        .retries(0)
        .build()
        .unwrap();

    // No retries left for the automatic path
    assert!(!job.re_create(&queue, false).await.unwrap());
    // The manual path has no exhaustion check
    assert!(job.re_schedule(&queue, false).await.unwrap());
    assert_eq!(job.retries_remaining(), Some(0));
}
