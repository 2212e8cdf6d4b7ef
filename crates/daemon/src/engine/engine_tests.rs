// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::handler::HandlerError;
use crate::testkit::{self, TestPlane};
use fm_core::TaskState;
use fm_store::StateStore as _;
use parking_lot::Mutex as PlMutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::Semaphore;

fn config(max_concurrent: usize) -> EngineConfig {
    EngineConfig { max_concurrent_tasks: max_concurrent, ..EngineConfig::default() }
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { max_attempts, initial_delay_ms: 1_000, max_delay_ms: 10_000, factor: 2.0 }
}

async fn plane_with_echo(max_concurrent: usize) -> (TestPlane, Arc<AtomicU32>) {
    let plane = testkit::start(config(max_concurrent), policy(3)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("echo", move |payload, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(payload.data)
        }
    });
    (plane, calls)
}

#[tokio::test(start_paused = true)]
async fn happy_path_runs_to_completed() {
    let (plane, calls) = plane_with_echo(2).await;

    let task = Task::builder().id("t1").kind("echo").payload(fm_core::TaskPayload::text("hi")).build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t1", TaskState::Completed, Duration::from_secs(5)).await;
    assert_eq!(doc.result.as_deref(), Some(&b"hi"[..]));
    assert_eq!(doc.attempt, 0);
    assert!(doc.last_error.is_none());
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    plane.settle(Duration::from_millis(50)).await;
    assert_eq!(plane.stats.snapshot().processed, 1);
    assert!(plane.engine.registry().is_empty());

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_invokes_the_handler_once() {
    let plane = testkit::start(config(2), policy(3)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Semaphore::new(0));

    let counter = Arc::clone(&calls);
    let handler_gate = Arc::clone(&gate);
    plane.handlers.register_fn("gated", move |payload, _cancel| {
        let counter = Arc::clone(&counter);
        let gate = Arc::clone(&handler_gate);
        async move {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            let _permit = gate.acquire().await;
            Ok(payload.data)
        }
    });

    let task = Task::builder().id("t1").kind("gated").build();
    plane.submit(&task).await;
    // second delivery of the same id while the first is in flight
    plane.publish_raw("t1", serde_json::to_vec(&task).unwrap()).await;
    plane.settle(Duration::from_millis(100)).await;

    gate.add_permits(4);
    plane.wait_for_state("t1", TaskState::Completed, Duration::from_secs(5)).await;
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_records_fail_terminally_without_poisoning() {
    let (plane, calls) = plane_with_echo(2).await;

    plane.publish_raw("garbage", b"\x01 not a task".to_vec()).await;
    plane.settle(Duration::from_millis(200)).await;

    // consumer moved on and still processes valid work
    let task = Task::builder().id("t-after").kind("echo").build();
    plane.submit(&task).await;
    plane.wait_for_state("t-after", TaskState::Completed, Duration::from_secs(5)).await;

    assert_eq!(plane.stats.snapshot().failed, 1);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    // a tombstone document exists for the poison record
    let docs = plane.store.list_prefix("task:").await.unwrap();
    let tombstone = docs.iter().find(|(k, _)| k.contains("task-p"));
    assert!(tombstone.is_some());

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn missing_handler_is_a_terminal_failure() {
    let plane = testkit::start(config(2), policy(3)).await;

    let task = Task::builder().id("t1").kind("nonexistent").build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t1", TaskState::Failed, Duration::from_secs(5)).await;
    assert_eq!(doc.last_error.as_deref(), Some("no-handler: nonexistent"));
    assert_eq!(doc.attempt, 0);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn permanent_handler_errors_skip_the_retry_budget() {
    let plane = testkit::start(config(2), policy(5)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("doomed", move |_payload, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Err::<Vec<u8>, _>(HandlerError::permanent("bad payload shape"))
        }
    });

    let task = Task::builder().id("t1").kind("doomed").build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t1", TaskState::Failed, Duration::from_secs(5)).await;
    assert_eq!(doc.last_error.as_deref(), Some("bad payload shape"));
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(plane.stats.snapshot().retries, 0);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff_then_succeed() {
    let plane = testkit::start(config(2), policy(3)).await;
    let call_times = Arc::new(PlMutex::new(Vec::<tokio::time::Instant>::new()));

    let times = Arc::clone(&call_times);
    plane.handlers.register_fn("flaky", move |payload, _cancel| {
        let times = Arc::clone(&times);
        async move {
            let mut calls = times.lock();
            calls.push(tokio::time::Instant::now());
            if calls.len() < 3 {
                Err(HandlerError::transient("connection reset"))
            } else {
                Ok(payload.data)
            }
        }
    });

    let task = Task::builder().id("t2").kind("flaky").build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t2", TaskState::Completed, Duration::from_secs(60)).await;
    assert_eq!(doc.attempt, 2);
    assert_eq!(plane.stats.snapshot().retries, 2);

    let times = call_times.lock();
    assert_eq!(times.len(), 3);
    // backoff: >= 1s before attempt 1, >= 2s before attempt 2
    assert!(times[1] - times[0] >= Duration::from_secs(1));
    assert!(times[2] - times[1] >= Duration::from_secs(2));

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_fails_terminally_and_stays_failed() {
    let plane = testkit::start(config(2), policy(2)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("always-down", move |_payload, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Err::<Vec<u8>, _>(HandlerError::transient("still down"))
        }
    });

    let task = Task::builder().id("t3").kind("always-down").build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t3", TaskState::Failed, Duration::from_secs(60)).await;
    assert_eq!(doc.attempt, 1);
    assert_eq!(doc.last_error.as_deref(), Some("still down"));
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);

    // well past max_delay: no further attempts
    plane.settle(Duration::from_secs(30)).await;
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    assert_eq!(plane.task_doc("t3").await.unwrap().state, TaskState::Failed);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_holds_and_queue_drains_fifo() {
    let plane = testkit::start(config(2), policy(3)).await;
    let gate = Arc::new(Semaphore::new(0));
    let inflight = Arc::new(AtomicUsize::new(0));
    let max_inflight = Arc::new(AtomicUsize::new(0));
    let start_order = Arc::new(PlMutex::new(Vec::<String>::new()));

    let handler_gate = Arc::clone(&gate);
    let handler_inflight = Arc::clone(&inflight);
    let handler_max = Arc::clone(&max_inflight);
    let handler_order = Arc::clone(&start_order);
    plane.handlers.register_fn("blocker", move |payload, _cancel| {
        let gate = Arc::clone(&handler_gate);
        let inflight = Arc::clone(&handler_inflight);
        let max = Arc::clone(&handler_max);
        let order = Arc::clone(&handler_order);
        async move {
            order.lock().push(String::from_utf8_lossy(&payload.data).into_owned());
            let now = inflight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            max.fetch_max(now, AtomicOrdering::SeqCst);
            let _permit = gate.acquire().await;
            inflight.fetch_sub(1, AtomicOrdering::SeqCst);
            Ok(payload.data)
        }
    });

    for (i, id) in ["t1", "t2", "t3", "t4", "t5"].iter().enumerate() {
        let task = Task::builder()
            .id(*id)
            .kind("blocker")
            .payload(fm_core::TaskPayload::text(*id))
            .now_ms(1_000 + i as u64)
            .build();
        plane.submit(&task).await;
        // serialize arrival so admission order matches submission order
        plane.settle(Duration::from_millis(10)).await;
    }
    plane.settle(Duration::from_millis(200)).await;

    let status = plane.engine.status();
    assert_eq!(status.active, 2);
    assert_eq!(status.queued, 3);
    assert_eq!(plane.engine.registry().count_in(TaskState::Pending), 3);

    gate.add_permits(16);
    for id in ["t1", "t2", "t3", "t4", "t5"] {
        plane.wait_for_state(id, TaskState::Completed, Duration::from_secs(10)).await;
    }

    assert!(max_inflight.load(AtomicOrdering::SeqCst) <= 2);
    let order = start_order.lock().clone();
    let expected: Vec<String> = ["t1", "t2", "t3", "t4", "t5"].iter().map(|s| s.to_string()).collect();
    assert_eq!(order, expected);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn priority_orders_the_waiting_list() {
    let plane = testkit::start(config(1), policy(3)).await;
    let gate = Arc::new(Semaphore::new(0));
    let start_order = Arc::new(PlMutex::new(Vec::<String>::new()));

    let handler_gate = Arc::clone(&gate);
    let handler_order = Arc::clone(&start_order);
    plane.handlers.register_fn("blocker", move |payload, _cancel| {
        let gate = Arc::clone(&handler_gate);
        let order = Arc::clone(&handler_order);
        async move {
            order.lock().push(String::from_utf8_lossy(&payload.data).into_owned());
            let _permit = gate.acquire().await;
            Ok(vec![])
        }
    });

    // occupy the single slot, then queue low before high
    let hold = Task::builder().id("hold").kind("blocker").payload(fm_core::TaskPayload::text("hold")).build();
    plane.submit(&hold).await;
    plane.settle(Duration::from_millis(50)).await;

    let low = Task::builder().id("low").kind("blocker").priority(1).payload(fm_core::TaskPayload::text("low")).build();
    let high = Task::builder().id("high").kind("blocker").priority(9).payload(fm_core::TaskPayload::text("high")).build();
    plane.submit(&low).await;
    plane.submit(&high).await;
    plane.settle(Duration::from_millis(50)).await;

    gate.add_permits(16);
    for id in ["hold", "low", "high"] {
        plane.wait_for_state(id, TaskState::Completed, Duration::from_secs(10)).await;
    }

    let order = start_order.lock().clone();
    assert_eq!(order, vec!["hold".to_string(), "high".to_string(), "low".to_string()]);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_flight_raises_the_signal_and_records_cancelled() {
    let plane = testkit::start(config(2), policy(3)).await;

    plane.handlers.register_fn("sleepy", move |_payload, cancel| async move {
        tokio::select! {
            _ = cancel.cancelled() => Err(HandlerError::transient("interrupted")),
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(vec![1]),
        }
    });

    let task = Task::builder().id("t5").kind("sleepy").build();
    plane.submit(&task).await;
    plane.wait_for_state("t5", TaskState::Processing, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    let outcome = plane.engine.request_cancel(&TaskId::new("t5")).await;
    assert_eq!(outcome, CancelOutcome::SignalledRunning);

    let doc = plane.wait_for_state("t5", TaskState::Cancelled, Duration::from_secs(5)).await;
    assert!(doc.result.is_none());

    // idempotent: cancelling again leaves the terminal state alone
    let outcome = plane.engine.request_cancel(&TaskId::new("t5")).await;
    assert_eq!(outcome, CancelOutcome::AlreadyTerminal);
    assert_eq!(plane.task_doc("t5").await.unwrap().state, TaskState::Cancelled);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_before_start_short_circuits_on_dequeue() {
    let plane = testkit::start(config(1), policy(3)).await;
    let gate = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicU32::new(0));

    let handler_gate = Arc::clone(&gate);
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("blocker", move |_payload, _cancel| {
        let gate = Arc::clone(&handler_gate);
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            let _permit = gate.acquire().await;
            Ok(vec![])
        }
    });

    let hold = Task::builder().id("hold").kind("blocker").build();
    let queued = Task::builder().id("queued").kind("blocker").build();
    plane.submit(&hold).await;
    plane.settle(Duration::from_millis(50)).await;
    plane.submit(&queued).await;
    plane.settle(Duration::from_millis(50)).await;

    let outcome = plane.engine.request_cancel(&TaskId::new("queued")).await;
    assert_eq!(outcome, CancelOutcome::CancelledQueued);

    gate.add_permits(4);
    plane.wait_for_state("hold", TaskState::Completed, Duration::from_secs(5)).await;
    plane.wait_for_state("queued", TaskState::Cancelled, Duration::from_secs(5)).await;
    // the queued task never ran
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn pause_defers_admission_and_resume_recovers() {
    let (plane, calls) = plane_with_echo(2).await;

    plane.engine.pause();
    let task = Task::builder().id("t-paused").kind("echo").build();
    plane.submit(&task).await;
    plane.settle(Duration::from_millis(300)).await;

    assert_eq!(plane.task_doc("t-paused").await.unwrap().state, TaskState::Pending);
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

    plane.engine.resume().await;
    plane.wait_for_state("t-paused", TaskState::Completed, Duration::from_secs(5)).await;
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_is_retried_as_transient() {
    let plane = testkit::start(
        EngineConfig { attempt_timeout: Duration::from_secs(2), ..config(2) },
        policy(2),
    )
    .await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("hang", move |_payload, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    });

    let task = Task::builder().id("t-hang").kind("hang").build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t-hang", TaskState::Failed, Duration::from_secs(120)).await;
    assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    assert!(doc.last_error.as_deref().unwrap_or_default().contains("timed out"));

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_active_work() {
    let (plane, _calls) = plane_with_echo(2).await;

    let task = Task::builder().id("t-drain").kind("echo").build();
    plane.submit(&task).await;
    plane.wait_for_state("t-drain", TaskState::Completed, Duration::from_secs(5)).await;

    assert!(plane.engine.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn config_updates_apply_to_subsequent_admissions() {
    let plane = testkit::start(config(1), policy(3)).await;
    let gate = Arc::new(Semaphore::new(0));
    let handler_gate = Arc::clone(&gate);
    plane.handlers.register_fn("blocker", move |_payload, _cancel| {
        let gate = Arc::clone(&handler_gate);
        async move {
            let _permit = gate.acquire().await;
            Ok(vec![])
        }
    });

    plane.submit(&Task::builder().id("a").kind("blocker").build()).await;
    plane.submit(&Task::builder().id("b").kind("blocker").build()).await;
    plane.settle(Duration::from_millis(100)).await;
    assert_eq!(plane.engine.status().active, 1);

    let mut cfg = plane.engine.config();
    cfg.max_concurrent_tasks = 2;
    plane.engine.set_config(cfg);
    plane.engine.resume().await; // pump under the raised limit
    plane.settle(Duration::from_millis(100)).await;
    assert_eq!(plane.engine.status().active, 2);

    gate.add_permits(8);
    plane.wait_for_state("a", TaskState::Completed, Duration::from_secs(5)).await;
    plane.wait_for_state("b", TaskState::Completed, Duration::from_secs(5)).await;
    plane.stop().await;
}
