// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex as PlMutex;
use yare::parameterized;

fn controller() -> RetryController {
    RetryController::new(RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1_000,
        max_delay_ms: 10_000,
        factor: 2.0,
    })
}

#[parameterized(
    first_failure_retries = { 1, true, RetryDecision::Retry { delay: Duration::from_millis(1_000) } },
    second_failure_backs_off = { 2, true, RetryDecision::Retry { delay: Duration::from_millis(2_000) } },
    budget_exhausted = { 3, true, RetryDecision::Fail },
    permanent_fails_immediately = { 1, false, RetryDecision::Fail },
)]
fn decide(attempts_made: u32, transient: bool, expected: RetryDecision) {
    assert_eq!(controller().decide(attempts_made, transient), expected);
}

#[test]
fn policy_is_swappable_at_runtime() {
    let c = controller();
    c.set_policy(RetryPolicy { max_attempts: 1, ..c.policy() });
    assert_eq!(c.decide(1, true), RetryDecision::Fail);
}

/// Scripted outlet: fails the first `fail_publishes` republish calls.
struct ScriptedOutlet {
    fail_publishes: PlMutex<u32>,
    published: PlMutex<Vec<Task>>,
    exhausted: PlMutex<Option<String>>,
}

impl ScriptedOutlet {
    fn new(fail_publishes: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_publishes: PlMutex::new(fail_publishes),
            published: PlMutex::new(Vec::new()),
            exhausted: PlMutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl RetryOutlet for ScriptedOutlet {
    async fn republish(&self, task: &Task) -> Result<(), BusError> {
        let mut left = self.fail_publishes.lock();
        if *left > 0 {
            *left -= 1;
            return Err(BusError::Transient("scripted".to_string()));
        }
        self.published.lock().push(task.clone());
        Ok(())
    }

    async fn republished(&self, _task: &Task, _position: BusPosition) {}

    async fn republish_exhausted(&self, _task: Task, _position: BusPosition, error: String) {
        *self.exhausted.lock() = Some(error);
    }
}

fn position() -> BusPosition {
    BusPosition { partition: 0, offset: 7 }
}

#[tokio::test(start_paused = true)]
async fn schedule_waits_out_the_delay_then_publishes() {
    let c = controller();
    let outlet = ScriptedOutlet::new(0);
    let task = Task::builder().id("t1").build();

    let started = tokio::time::Instant::now();
    let handle = c.schedule(outlet.clone(), task, position(), Duration::from_secs(2));
    handle.await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(outlet.published.lock().len(), 1);
    assert!(outlet.exhausted.lock().is_none());
}

#[tokio::test(start_paused = true)]
async fn publish_failures_retry_on_the_same_schedule() {
    let c = controller();
    let outlet = ScriptedOutlet::new(2);
    let task = Task::builder().id("t1").build();

    let started = tokio::time::Instant::now();
    let handle = c.schedule(outlet.clone(), task, position(), Duration::from_secs(1));
    handle.await.unwrap();

    // initial delay + two same-length retry gaps
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(outlet.published.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn publish_exhaustion_records_terminal_failure() {
    let c = controller();
    let outlet = ScriptedOutlet::new(u32::MAX);
    let task = Task::builder().id("t1").build();

    let handle = c.schedule(outlet.clone(), task, position(), Duration::from_millis(10));
    handle.await.unwrap();

    assert!(outlet.published.lock().is_empty());
    let error = outlet.exhausted.lock().clone().unwrap();
    assert!(error.starts_with("retry-publish-exhausted"));
}
