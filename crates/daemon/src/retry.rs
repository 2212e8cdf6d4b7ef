// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry controller: terminality decisions and deferred re-enqueue.
//!
//! The dispatch engine owns the controller and hands it an outlet at
//! schedule time; the controller never holds a reference back into the
//! engine. Timers are purely in-process; after a crash the startup
//! recovery sweep re-publishes whatever was still pending.

use crate::registry::BusPosition;
use fm_bus::BusError;
use fm_core::{RetryPolicy, Task};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Publish retries after the first failed re-enqueue attempt.
const REPUBLISH_RETRIES: u32 = 3;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after the backoff delay.
    Retry { delay: Duration },
    /// Terminal: mark the task failed.
    Fail,
}

/// Where scheduled republishes land.
///
/// Implemented by the engine; injected per call so ownership stays
/// one-way (engine → controller).
#[async_trait::async_trait]
pub trait RetryOutlet: Send + Sync {
    /// Re-publish the task onto the task topic, keyed by task id.
    async fn republish(&self, task: &Task) -> Result<(), BusError>;

    /// The re-publish landed; the attempt's offset may now be committed.
    async fn republished(&self, task: &Task, position: BusPosition);

    /// Every publish attempt failed; record the task as terminally
    /// failed with the given error message.
    async fn republish_exhausted(&self, task: Task, position: BusPosition, error: String);
}

/// Computes backoff delays and schedules deferred re-enqueue.
pub struct RetryController {
    policy: Mutex<RetryPolicy>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy: Mutex::new(policy) }
    }

    pub fn policy(&self) -> RetryPolicy {
        *self.policy.lock()
    }

    pub fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.lock() = policy;
    }

    /// Decide a failed attempt's fate.
    ///
    /// `attempts_made` counts completed handler invocations including
    /// the one that just failed. Permanent classifications are
    /// authoritative: they fail regardless of remaining budget.
    pub fn decide(&self, attempts_made: u32, transient: bool) -> RetryDecision {
        let policy = *self.policy.lock();
        if !transient || !policy.allows_another_attempt(attempts_made) {
            return RetryDecision::Fail;
        }
        RetryDecision::Retry { delay: policy.delay_for(attempts_made) }
    }

    /// Spawn the deferred re-enqueue for `task` (already rewound to
    /// pending with `attempt` bumped). Publish failures retry on the
    /// same delay; exhaustion records a terminal failure through the
    /// outlet. The returned handle is only observed by tests; on
    /// process exit pending timers are simply abandoned.
    pub fn schedule(
        &self,
        outlet: Arc<dyn RetryOutlet>,
        task: Task,
        position: BusPosition,
        delay: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut publish_failures = 0u32;
            loop {
                match outlet.republish(&task).await {
                    Ok(()) => {
                        outlet.republished(&task, position).await;
                        return;
                    }
                    Err(err) if publish_failures < REPUBLISH_RETRIES => {
                        publish_failures += 1;
                        warn!(
                            task = %task.id,
                            attempt = task.attempt,
                            failures = publish_failures,
                            %err,
                            "retry re-publish failed, will retry"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        outlet
                            .republish_exhausted(
                                task,
                                position,
                                format!("retry-publish-exhausted: {err}"),
                            )
                            .await;
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
