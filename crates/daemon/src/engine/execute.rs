// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task attempt execution and failure handling.

use super::{Engine, EngineInner, WaitingTask};
use crate::handler::HandlerError;
use crate::registry::BusPosition;
use crate::retry::{RetryDecision, RetryOutlet};
use fm_bus::{topics, BusError};
use fm_core::{Clock, Event, Task, TaskState};
use fm_store::{docs, keys, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Attempts at a terminal state-store write before alerting.
const TERMINAL_WRITE_RETRIES: u32 = 3;
/// Attempts at an offset commit before escalating.
const COMMIT_RETRIES: u32 = 3;

enum AttemptOutcome {
    Done(Vec<u8>),
    Failed(HandlerError),
    TimedOut(Duration),
    Cancelled,
    Abandoned,
}

impl<C: Clock> Engine<C> {
    /// Drive one attempt from `Assigned` to a terminal per-attempt
    /// decision.
    pub(super) async fn run_task(&self, task: Task, cancel: CancellationToken, position: BusPosition) {
        let inner = &self.inner;
        let now = inner.clock.epoch_ms();
        let Some(task) = inner.registry.update(&task.id, |t| t.transition(TaskState::Processing, now))
        else {
            // Cancelled out from under us between admit and start.
            inner.release_slot();
            inner.notify_slot();
            return;
        };
        inner.events.emit(Event::TaskStarted { id: task.id.clone(), attempt: task.attempt });

        if let Err(err) = inner.persist(&task).await {
            warn!(task = %task.id, %err, "processing write failed; treating as transient failure");
            self.fail_attempt(task, position, true, format!("state store unavailable: {err}")).await;
            return;
        }

        if task.past_deadline(inner.clock.epoch_ms()) {
            self.finish_failed(task, position, "deadline-exceeded".to_string()).await;
            return;
        }

        let Some(handler) = inner.handlers.get(&task.kind) else {
            let error = format!("no-handler: {}", task.kind);
            self.finish_failed(task, position, error).await;
            return;
        };

        let attempt_timeout = inner.cfg.lock().attempt_timeout;
        let payload = task.payload.clone();
        let outcome = tokio::select! {
            biased;
            _ = inner.abandon.cancelled() => AttemptOutcome::Abandoned,
            _ = cancel.cancelled() => AttemptOutcome::Cancelled,
            result = tokio::time::timeout(attempt_timeout, handler.execute(payload, cancel.clone())) => {
                match result {
                    Ok(Ok(bytes)) => AttemptOutcome::Done(bytes),
                    Ok(Err(err)) => AttemptOutcome::Failed(err),
                    Err(_) => AttemptOutcome::TimedOut(attempt_timeout),
                }
            }
        };

        match outcome {
            AttemptOutcome::Done(result) => self.finish_completed(task, position, result).await,
            AttemptOutcome::Failed(err) => {
                self.fail_attempt(task, position, err.transient, err.message).await
            }
            AttemptOutcome::TimedOut(after) => {
                // Raise the signal; the handler's eventual return is ignored.
                cancel.cancel();
                self.fail_attempt(
                    task,
                    position,
                    true,
                    format!("attempt timed out after {}ms", after.as_millis()),
                )
                .await
            }
            AttemptOutcome::Cancelled => self.finish_cancelled(task, position).await,
            AttemptOutcome::Abandoned => {
                // Shutdown drain expired: no terminal write, no commit;
                // the uncommitted offset gets the task redelivered on
                // the next start.
                cancel.cancel();
                inner.registry.remove(&task.id);
                inner.release_slot();
                inner.notify_slot();
            }
        }
    }

    pub(super) async fn finish_completed(&self, mut task: Task, position: BusPosition, result: Vec<u8>) {
        task.complete(result, self.inner.clock.epoch_ms());
        if !self.inner.persist_terminal(&task).await {
            return;
        }
        self.inner.commit(position).await;
        self.inner.stats.record_processed();
        self.inner.events.emit(Event::TaskCompleted { id: task.id.clone(), attempt: task.attempt });
        self.inner.registry.remove(&task.id);
        self.inner.release_slot();
        self.inner.notify_slot();
        self.pump_waiting().await;
    }

    pub(super) async fn finish_failed(&self, mut task: Task, position: BusPosition, error: String) {
        task.fail(error.clone(), self.inner.clock.epoch_ms());
        if !self.inner.persist_terminal(&task).await {
            return;
        }
        self.inner.commit(position).await;
        self.inner.stats.record_failed();
        self.inner.events.emit(Event::TaskFailed { id: task.id.clone(), attempt: task.attempt, error });
        self.inner.registry.remove(&task.id);
        self.inner.release_slot();
        self.inner.notify_slot();
        self.pump_waiting().await;
    }

    pub(super) async fn finish_cancelled(&self, mut task: Task, position: BusPosition) {
        task.transition(TaskState::Cancelled, self.inner.clock.epoch_ms());
        if !self.inner.persist_terminal(&task).await {
            return;
        }
        self.inner.commit(position).await;
        self.inner.events.emit(Event::TaskCancelled { id: task.id.clone() });
        self.inner.registry.remove(&task.id);
        self.inner.release_slot();
        self.inner.notify_slot();
        self.pump_waiting().await;
    }

    /// Cancel a task that never started (waiting list or cancel
    /// intent). Terminal write + commit; no handler ever ran.
    pub(super) async fn finish_queued_cancel(&self, waiting: WaitingTask) {
        let mut task = waiting.task;
        if task.state != TaskState::Cancelled {
            task.transition(TaskState::Cancelled, self.inner.clock.epoch_ms());
            let _ = self.inner.persist_terminal(&task).await;
            self.inner.events.emit(Event::TaskCancelled { id: task.id.clone() });
        }
        self.inner.registry.remove(&task.id);
        self.inner.commit(waiting.position).await;
        self.inner.notify_slot();
    }

    /// Route a failed attempt through the retry controller.
    pub(super) async fn fail_attempt(
        &self,
        task: Task,
        position: BusPosition,
        transient: bool,
        message: String,
    ) {
        let attempts_made = task.attempt + 1;
        match self.inner.retry.decide(attempts_made, transient) {
            RetryDecision::Fail => self.finish_failed(task, position, message).await,
            RetryDecision::Retry { delay } => {
                let next = task.for_retry(message.clone(), self.inner.clock.epoch_ms());
                if let Err(err) = self.inner.persist(&next).await {
                    // The bus message carries the truth; the document
                    // catches up on the next transition.
                    warn!(task = %next.id, %err, "retry state write failed");
                }
                self.inner.stats.record_retry();
                self.inner.events.emit(Event::TaskRetrying {
                    id: next.id.clone(),
                    attempt: next.attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: message,
                });
                self.inner.registry.remove(&next.id);
                self.inner.release_slot();
                self.inner.notify_slot();
                let outlet: Arc<dyn RetryOutlet> = Arc::clone(&self.inner) as Arc<dyn RetryOutlet>;
                self.inner.retry.schedule(outlet, next, position, delay);
                self.pump_waiting().await;
            }
        }
    }
}

impl<C: Clock> EngineInner<C> {
    pub(crate) async fn persist(&self, task: &Task) -> Result<(), StoreError> {
        self.store.put(&keys::task_key(&task.id), docs::encode_task(task), None).await
    }

    /// Terminal transitions retry the write; losing one would leave a
    /// client-visible document behind the truth forever.
    pub(crate) async fn persist_terminal(&self, task: &Task) -> bool {
        for attempt in 1..=TERMINAL_WRITE_RETRIES {
            match self.persist(task).await {
                Ok(()) => return true,
                Err(err) if attempt < TERMINAL_WRITE_RETRIES => {
                    warn!(task = %task.id, %err, attempt, "terminal state write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(err) => {
                    error!(
                        task = %task.id,
                        state = %task.state,
                        %err,
                        "terminal state write failed repeatedly; leaving task in active set, offset uncommitted"
                    );
                }
            }
        }
        false
    }

    pub(crate) async fn commit(&self, position: BusPosition) {
        for attempt in 1..=COMMIT_RETRIES {
            match self
                .bus
                .commit(topics::TASKS, &self.group, position.partition, position.offset)
                .await
            {
                Ok(()) => return,
                Err(err) if attempt < COMMIT_RETRIES && err.is_transient() => {
                    warn!(%err, attempt, "offset commit failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(err) => {
                    error!(
                        partition = position.partition,
                        offset = position.offset,
                        %err,
                        "offset commit failed; redelivery may duplicate work"
                    );
                    return;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<C: Clock> RetryOutlet for EngineInner<C> {
    async fn republish(&self, task: &Task) -> Result<(), BusError> {
        let payload = serde_json::to_vec(task)
            .map_err(|err| BusError::Transient(format!("task encode failed: {err}")))?;
        self.bus.publish(topics::TASKS, task.id.as_str(), payload).await
    }

    async fn republished(&self, task: &Task, position: BusPosition) {
        debug!(task = %task.id, attempt = task.attempt, "re-enqueued after backoff");
        self.commit(position).await;
    }

    async fn republish_exhausted(&self, mut task: Task, position: BusPosition, error: String) {
        task.fail(error.clone(), self.clock.epoch_ms());
        if !self.persist_terminal(&task).await {
            return;
        }
        self.commit(position).await;
        self.stats.record_failed();
        self.events.emit(Event::TaskFailed { id: task.id.clone(), attempt: task.attempt, error });
    }
}
