// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against the in-process plane: submit through
//! the bus, observe documents and the event feed.

use fm_core::{Event, RetryPolicy, ServerId, Task, TaskId, TaskPayload, TaskState};
use fm_daemon::engine::EngineConfig;
use fm_daemon::handler::HandlerError;
use fm_daemon::testkit;
use fm_daemon::workers::ServerDetails;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

fn spec_config(max_concurrent: usize) -> EngineConfig {
    EngineConfig { max_concurrent_tasks: max_concurrent, ..EngineConfig::default() }
}

fn spec_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { max_attempts, initial_delay_ms: 1_000, max_delay_ms: 10_000, factor: 2.0 }
}

async fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn happy_path_walks_the_lifecycle_in_order() {
    let plane = testkit::start(spec_config(2), spec_policy(3)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("echo", move |payload, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(payload.data)
        }
    });

    let mut events = plane.events.subscribe();
    let task = Task::builder().id("t1").kind("echo").payload(TaskPayload::text("hi")).build();
    plane.submit(&task).await;

    let doc = plane.wait_for_state("t1", TaskState::Completed, Duration::from_secs(5)).await;
    assert_eq!(doc.result.as_deref(), Some(&b"hi"[..]));
    assert_eq!(doc.attempt, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    plane.settle(Duration::from_millis(50)).await;

    // observed sequence is a path on the lifecycle DAG, no back-edges
    let sequence: Vec<Event> = drain_events(&mut events)
        .await
        .into_iter()
        .filter(|e| e.task_id() == Some(&TaskId::new("t1")))
        .collect();
    assert_eq!(
        sequence,
        vec![
            Event::TaskAssigned { id: TaskId::new("t1"), attempt: 0 },
            Event::TaskStarted { id: TaskId::new("t1"), attempt: 0 },
            Event::TaskCompleted { id: TaskId::new("t1"), attempt: 0 },
        ]
    );

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn retry_then_success_observes_the_backoff_schedule() {
    let plane = testkit::start(spec_config(2), spec_policy(3)).await;
    let attempts = Arc::new(Mutex::new(Vec::<tokio::time::Instant>::new()));

    let log = Arc::clone(&attempts);
    plane.handlers.register_fn("flaky", move |payload, _cancel| {
        let log = Arc::clone(&log);
        async move {
            let mut attempts = log.lock();
            attempts.push(tokio::time::Instant::now());
            if attempts.len() < 3 {
                Err(HandlerError::transient("upstream hiccup"))
            } else {
                Ok(payload.data)
            }
        }
    });

    plane.submit(&Task::builder().id("t2").kind("flaky").build()).await;
    let doc = plane.wait_for_state("t2", TaskState::Completed, Duration::from_secs(60)).await;
    assert_eq!(doc.attempt, 2);

    let attempts = attempts.lock();
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1] - attempts[0] >= Duration::from_millis(1_000));
    assert!(attempts[2] - attempts[1] >= Duration::from_millis(2_000));

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_is_terminal() {
    let plane = testkit::start(spec_config(2), spec_policy(2)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    plane.handlers.register_fn("down", move |_payload, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Vec<u8>, _>(HandlerError::transient("dependency offline"))
        }
    });

    plane.submit(&Task::builder().id("t3").kind("down").build()).await;
    let doc = plane.wait_for_state("t3", TaskState::Failed, Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(doc.last_error.is_some());

    // well past max_delay: still failed, no further handler calls
    plane.settle(Duration::from_secs(15)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(plane.task_doc("t3").await.unwrap().state, TaskState::Failed);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_bounds_processing_and_preserves_fifo() {
    let plane = testkit::start(spec_config(2), spec_policy(3)).await;
    let gate = Arc::new(Semaphore::new(0));
    let inflight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::<String>::new()));

    let h_gate = Arc::clone(&gate);
    let h_inflight = Arc::clone(&inflight);
    let h_peak = Arc::clone(&peak);
    let h_starts = Arc::clone(&starts);
    plane.handlers.register_fn("gated", move |payload, _cancel| {
        let gate = Arc::clone(&h_gate);
        let inflight = Arc::clone(&h_inflight);
        let peak = Arc::clone(&h_peak);
        let starts = Arc::clone(&h_starts);
        async move {
            starts.lock().push(String::from_utf8_lossy(&payload.data).into_owned());
            let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let _permit = gate.acquire().await;
            inflight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![])
        }
    });

    for (i, id) in ["g1", "g2", "g3", "g4", "g5"].iter().enumerate() {
        let task = Task::builder()
            .id(*id)
            .kind("gated")
            .payload(TaskPayload::text(*id))
            .now_ms(1_000 + i as u64)
            .build();
        plane.submit(&task).await;
        plane.settle(Duration::from_millis(10)).await;
    }
    plane.settle(Duration::from_millis(100)).await;

    // exactly two processing, three queued pending
    assert_eq!(plane.engine.status().active, 2);
    assert_eq!(plane.engine.status().queued, 3);
    for id in ["g3", "g4", "g5"] {
        assert_eq!(plane.task_doc(id).await.unwrap().state, TaskState::Pending);
    }

    gate.add_permits(16);
    for id in ["g1", "g2", "g3", "g4", "g5"] {
        plane.wait_for_state(id, TaskState::Completed, Duration::from_secs(10)).await;
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    let starts = starts.lock().clone();
    assert_eq!(starts, vec!["g1", "g2", "g3", "g4", "g5"]);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_flight_ends_cancelled_without_result() {
    let plane = testkit::start(spec_config(2), spec_policy(3)).await;
    plane.handlers.register_fn("slow", |_payload, cancel| async move {
        tokio::select! {
            _ = cancel.cancelled() => Err(HandlerError::transient("interrupted")),
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(b"done".to_vec()),
        }
    });

    plane.submit(&Task::builder().id("t5").kind("slow").build()).await;
    plane.wait_for_state("t5", TaskState::Processing, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    plane.engine.request_cancel(&TaskId::new("t5")).await;

    let doc = plane.wait_for_state("t5", TaskState::Cancelled, Duration::from_secs(5)).await;
    assert!(doc.result.is_none());
    assert!(doc.state.is_terminal());

    // cancel stays idempotent after the fact
    plane.engine.request_cancel(&TaskId::new("t5")).await;
    assert_eq!(plane.task_doc("t5").await.unwrap().state, TaskState::Cancelled);

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn worker_health_gates_discovery() {
    let plane = testkit::start(spec_config(2), spec_policy(3)).await;
    let gpu: fm_core::CapabilitySet = ["gpu"].into_iter().collect();

    plane.control.add_server(ServerDetails {
        server_id: ServerId::new("srv-w"),
        name: "w".to_string(),
        version: "1.0".to_string(),
        endpoints: vec![],
        capabilities: ["gpu", "cuda"].into_iter().collect(),
    });
    plane.workers.register(&ServerId::new("srv-w")).await.unwrap();

    // probe failure: invisible to discovery
    plane.control.set_probe_error(&ServerId::new("srv-w"), "unreachable");
    plane.workers.probe_all().await;
    assert!(plane.workers.discover(&gpu).is_empty());

    // probe recovers within one interval: visible again
    plane.control.set_health(&ServerId::new("srv-w"), fm_core::WorkerHealth::Healthy);
    plane.workers.probe_all().await;
    let matched = plane.workers.discover(&gpu);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].server_id, "srv-w");

    plane.stop().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_delivery_of_one_id_runs_once() {
    let plane = testkit::start(spec_config(2), spec_policy(3)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let counter = Arc::clone(&calls);
    let h_gate = Arc::clone(&gate);
    plane.handlers.register_fn("echo", move |payload, _cancel| {
        let counter = Arc::clone(&counter);
        let gate = Arc::clone(&h_gate);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _permit = gate.acquire().await;
            Ok(payload.data)
        }
    });

    let task = Task::builder().id("dup").kind("echo").build();
    plane.submit(&task).await;
    // at-least-once redelivery of the same id while the first attempt runs
    plane.publish_raw("dup", serde_json::to_vec(&task).unwrap()).await;
    plane.settle(Duration::from_millis(100)).await;

    gate.add_permits(4);
    plane.wait_for_state("dup", TaskState::Completed, Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    plane.stop().await;
}
