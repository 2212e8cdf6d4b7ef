// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch engine: admission, concurrency gate, per-task lifecycle.
//!
//! One engine instance consumes the task topic through a consumer
//! group. Admission is bounded twice: `max_concurrent_tasks` running
//! attempts, plus a bounded in-process waiting list ordered by
//! (priority desc, enqueue time asc). When both are full the consumer
//! stops polling and broker-side lag is the queue. Offsets are
//! committed only after a terminal per-attempt decision, which is what
//! makes delivery at-least-once across crashes.

mod execute;
mod waiting;

pub use waiting::{WaitList, WaitingTask};

use crate::events::EventFeed;
use crate::handler::HandlerRegistry;
use crate::metrics::Stats;
use crate::registry::{BusPosition, TaskRegistry};
use crate::retry::RetryController;
use fm_bus::{Bus, Record, Subscription};
use fm_core::{Clock, Event, RetryPolicy, Task, TaskId, TaskPayload, TaskState};
use fm_store::StateStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_BATCH: usize = 16;
const POLL_BACKOFF: Duration = Duration::from_millis(200);

/// Runtime-tunable engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size of the dispatch worker pool.
    pub max_concurrent_tasks: usize,
    /// Per-attempt cancellation deadline.
    pub attempt_timeout: Duration,
    /// Bound on the in-process waiting list.
    pub waiting_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            attempt_timeout: Duration::from_secs(30),
            waiting_capacity: 64,
        }
    }
}

/// External collaborators and shared services the engine is built on.
pub struct EngineDeps<C: Clock> {
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StateStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub stats: Arc<Stats>,
    pub events: EventFeed,
    pub clock: C,
}

/// Point-in-time engine status for the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub paused: bool,
    pub active: usize,
    pub queued: usize,
}

/// Result of an external cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was waiting for a slot; it is now terminally cancelled.
    CancelledQueued,
    /// The task was mid-attempt; its cancellation signal was raised.
    SignalledRunning,
    /// Only the store document existed; it is now cancelled.
    CancelledStored,
    /// The task already reached a terminal state; cancel is a no-op.
    AlreadyTerminal,
    /// Nothing known yet; a cancel intent was recorded for arrival.
    IntentRecorded,
}

impl CancelOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            CancelOutcome::CancelledQueued => "cancelled before start",
            CancelOutcome::SignalledRunning => "cancellation signalled to running attempt",
            CancelOutcome::CancelledStored => "cancelled",
            CancelOutcome::AlreadyTerminal => "already terminal; no effect",
            CancelOutcome::IntentRecorded => "cancel recorded; applies on arrival",
        }
    }
}

pub(crate) struct EngineInner<C: Clock> {
    pub(crate) cfg: Mutex<EngineConfig>,
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) clock: C,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) registry: TaskRegistry,
    pub(crate) retry: RetryController,
    pub(crate) stats: Arc<Stats>,
    pub(crate) events: EventFeed,
    pub(crate) group: String,
    paused: AtomicBool,
    /// Worker-pool slots in use. The check-and-reserve is a single
    /// atomic update so concurrent admitters (consumer loop and the
    /// finisher tasks pumping the waiting list) cannot both take the
    /// last slot.
    slots_used: AtomicUsize,
    /// Wakes the consumer loop when a slot frees or admission resumes.
    admission_gate: Notify,
    /// Wakes the drain loop whenever an active attempt finishes.
    drained: Notify,
    pub(crate) waiting: Mutex<WaitList>,
    /// Cancel requests for tasks not yet seen; consumed on arrival.
    cancel_intents: Mutex<HashSet<TaskId>>,
    /// Stops the consumer loop.
    pub(crate) shutdown: CancellationToken,
    /// Raised after the drain timeout; abandons remaining attempts
    /// without committing their offsets.
    pub(crate) abandon: CancellationToken,
    pub(crate) nack_tx: mpsc::UnboundedSender<u32>,
    nack_rx: Mutex<Option<mpsc::UnboundedReceiver<u32>>>,
}

/// Cloneable handle on one dispatch engine instance.
pub struct Engine<C: Clock> {
    inner: Arc<EngineInner<C>>,
}

impl<C: Clock> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> Engine<C> {
    pub fn new(deps: EngineDeps<C>, config: EngineConfig, policy: RetryPolicy, group: impl Into<String>) -> Self {
        let (nack_tx, nack_rx) = mpsc::unbounded_channel();
        let waiting = WaitList::new(config.waiting_capacity);
        Self {
            inner: Arc::new(EngineInner {
                cfg: Mutex::new(config),
                bus: deps.bus,
                store: deps.store,
                clock: deps.clock,
                handlers: deps.handlers,
                registry: TaskRegistry::new(),
                retry: RetryController::new(policy),
                stats: deps.stats,
                events: deps.events,
                group: group.into(),
                paused: AtomicBool::new(false),
                slots_used: AtomicUsize::new(0),
                admission_gate: Notify::new(),
                drained: Notify::new(),
                waiting: Mutex::new(waiting),
                cancel_intents: Mutex::new(HashSet::new()),
                shutdown: CancellationToken::new(),
                abandon: CancellationToken::new(),
                nack_tx,
                nack_rx: Mutex::new(Some(nack_rx)),
            }),
        }
    }

    /// Consumer loop for the task topic. Runs until shutdown.
    pub async fn run(&self, mut sub: Box<dyn Subscription>) {
        let inner = &self.inner;
        let Some(mut nack_rx) = inner.nack_rx.lock().take() else {
            warn!("engine consumer loop started twice; ignoring");
            return;
        };
        info!(group = %inner.group, "dispatch engine consuming task topic");
        loop {
            // Admission gate: while paused or full, keep servicing
            // nacks but do not poll; broker lag is the queue.
            loop {
                if inner.shutdown.is_cancelled() {
                    return;
                }
                if !inner.paused() && inner.admission_room() {
                    break;
                }
                tokio::select! {
                    _ = inner.shutdown.cancelled() => return,
                    _ = inner.admission_gate.notified() => {}
                    Some(partition) = nack_rx.recv() => sub.nack(partition),
                }
            }

            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                Some(partition) = nack_rx.recv() => sub.nack(partition),
                polled = sub.poll(POLL_BATCH) => match polled {
                    Ok(records) => {
                        for record in records {
                            self.on_record(record).await;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "task topic poll failed");
                        tokio::time::sleep(POLL_BACKOFF).await;
                    }
                },
            }
        }
    }

    /// Gate admission; in-flight attempts continue.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("admission paused");
            self.inner.events.emit(Event::EnginePaused);
        }
    }

    /// Reopen admission and drain the waiting list.
    pub async fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            info!("admission resumed");
            self.inner.events.emit(Event::EngineResumed);
        }
        self.inner.admission_gate.notify_one();
        self.pump_waiting().await;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused()
    }

    /// Completes once shutdown has been requested; lets sibling loops
    /// (command feed) stop alongside the consumer.
    pub async fn cancelled(&self) {
        self.inner.shutdown.cancelled().await;
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            paused: self.inner.paused(),
            active: self.inner.registry.running_count(),
            queued: self.inner.waiting.lock().len(),
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn events(&self) -> &EventFeed {
        &self.inner.events
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> EngineConfig {
        *self.inner.cfg.lock()
    }

    pub fn set_config(&self, config: EngineConfig) {
        {
            let mut cfg = self.inner.cfg.lock();
            *cfg = config;
            self.inner.waiting.lock().set_capacity(config.waiting_capacity);
        }
        self.inner.admission_gate.notify_one();
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry.policy()
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.inner.retry.set_policy(policy);
    }

    /// Log a stats snapshot (the STATS admin command).
    pub fn log_stats(&self) {
        let snap = self.inner.stats.snapshot();
        let status = self.status();
        info!(
            processed = snap.processed,
            failed = snap.failed,
            retries = snap.retries,
            active = status.active,
            queued = status.queued,
            paused = status.paused,
            "engine stats"
        );
    }

    /// Idempotent external cancellation.
    pub async fn request_cancel(&self, id: &TaskId) -> CancelOutcome {
        let inner = &self.inner;

        // Queued: short-circuit to cancelled without ever starting.
        let queued = inner.waiting.lock().remove(id);
        if let Some(waiting) = queued {
            inner.registry.remove(id);
            self.finish_queued_cancel(waiting).await;
            inner.admission_gate.notify_one();
            return CancelOutcome::CancelledQueued;
        }

        // Running: raise the signal; the attempt future finishes the job.
        if let Some(token) = inner.registry.cancel_token(id) {
            token.cancel();
            return CancelOutcome::SignalledRunning;
        }

        // Not active here: settle against the store document.
        let key = fm_store::keys::task_key(id);
        match inner.store.get(&key).await {
            Ok(Some(bytes)) => match fm_store::docs::decode_task(&key, &bytes) {
                Ok(doc) if doc.state.is_terminal() => CancelOutcome::AlreadyTerminal,
                Ok(mut doc) => {
                    doc.transition(TaskState::Cancelled, inner.clock.epoch_ms());
                    if let Err(err) = inner.persist(&doc).await {
                        warn!(task = %id, %err, "cancel write failed; intent retained");
                    }
                    inner.events.emit(Event::TaskCancelled { id: id.clone() });
                    inner.cancel_intents.lock().insert(id.clone());
                    CancelOutcome::CancelledStored
                }
                Err(err) => {
                    warn!(task = %id, %err, "undecodable task document during cancel");
                    inner.cancel_intents.lock().insert(id.clone());
                    CancelOutcome::IntentRecorded
                }
            },
            Ok(None) | Err(_) => {
                inner.cancel_intents.lock().insert(id.clone());
                CancelOutcome::IntentRecorded
            }
        }
    }

    /// Stop admission and wait for active attempts, up to `drain`.
    /// Returns true on a clean drain. Abandoned attempts keep their
    /// offsets uncommitted and will be redelivered on the next start.
    pub async fn shutdown(&self, drain: Duration) -> bool {
        let inner = &self.inner;
        inner.shutdown.cancel();
        info!(active = inner.registry.running_count(), "engine draining");

        let deadline = tokio::time::Instant::now() + drain;
        loop {
            if inner.registry.running_count() == 0 {
                info!("engine drained cleanly");
                return true;
            }
            tokio::select! {
                _ = inner.drained.notified() => {}
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        warn!(remaining = inner.registry.running_count(), "drain timeout; abandoning active tasks");
        inner.abandon.cancel();
        let grace = tokio::time::Instant::now() + Duration::from_millis(250);
        while inner.registry.running_count() > 0 && tokio::time::Instant::now() < grace {
            tokio::select! {
                _ = inner.drained.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(25)) => {}
            }
        }
        false
    }
}

enum Admission {
    Run(Task),
    Parked,
    Refused,
}

impl<C: Clock> EngineInner<C> {
    pub(crate) fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn admission_room(&self) -> bool {
        let max = self.cfg.lock().max_concurrent_tasks;
        self.slots_used.load(Ordering::SeqCst) < max || self.waiting.lock().has_room()
    }

    /// Reserve one worker-pool slot. Check and increment happen in one
    /// atomic update; this is the only gate that may start an attempt.
    fn try_acquire_slot(&self) -> bool {
        let max = self.cfg.lock().max_concurrent_tasks;
        self.slots_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < max).then_some(used + 1)
            })
            .is_ok()
    }

    /// Return a slot taken by [`EngineInner::try_acquire_slot`].
    pub(crate) fn release_slot(&self) {
        let _ = self
            .slots_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| used.checked_sub(1));
    }

    fn take_intent(&self, id: &TaskId) -> bool {
        self.cancel_intents.lock().remove(id)
    }

    pub(crate) fn notify_slot(&self) {
        self.admission_gate.notify_one();
        self.drained.notify_one();
    }
}

impl<C: Clock> Engine<C> {
    /// Admission path for one bus record (decode, duplicate, pause,
    /// cancel intent, capacity, in that order).
    async fn on_record(&self, record: Record) {
        let inner = &self.inner;
        let position = BusPosition { partition: record.partition, offset: record.offset };

        let task: Task = match serde_json::from_slice(&record.payload) {
            Ok(task) => task,
            Err(err) => {
                self.reject_malformed(&record, position, err).await;
                return;
            }
        };

        if inner.registry.contains(&task.id) {
            // Duplicate delivery while the original attempt is still
            // in flight. Committing here would advance the partition
            // watermark past the original's uncommitted offset (same
            // key, same partition), so a crash in that window would
            // drop the in-flight task. Leave the duplicate uncommitted;
            // the original's terminal decision owns the watermark.
            return;
        }

        if inner.paused() {
            // Leave uncommitted; redelivered once admission resumes.
            let _ = inner.nack_tx.send(position.partition);
            return;
        }

        if inner.take_intent(&task.id) {
            self.finish_queued_cancel(WaitingTask { task, position }).await;
            return;
        }

        let admission = if inner.try_acquire_slot() {
            Admission::Run(task)
        } else {
            let registry_copy = task.clone();
            let pushed = inner.waiting.lock().push(task, position, inner.clock.epoch_ms());
            match pushed {
                Ok(()) => {
                    // Registry holds queued tasks too (duplicate
                    // guard + pending visibility); the placeholder
                    // token is replaced when the task starts.
                    inner.registry.upsert(registry_copy, CancellationToken::new(), position);
                    Admission::Parked
                }
                Err(waiting::WaitListFull(_)) => Admission::Refused,
            }
        };

        match admission {
            Admission::Run(task) => self.admit(task, position).await,
            Admission::Parked => {}
            Admission::Refused => {
                let _ = inner.nack_tx.send(position.partition);
            }
        }
    }

    /// Move a task into the worker pool and spawn its attempt. The
    /// caller holds a slot reservation; every terminal path for the
    /// attempt releases it.
    // Boxed and type-erased: this is the edge that closes the
    // admit -> fail -> pump -> admit cycle. A plain `async fn` here
    // would give the compiler a recursive opaque type it cannot
    // resolve, so the body is wrapped in an explicit boxed future
    // instead.
    fn admit(
        &self,
        mut task: Task,
        position: BusPosition,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let inner = &self.inner;
            let now = inner.clock.epoch_ms();
            task.transition(TaskState::Assigned, now);
            let cancel = CancellationToken::new();
            inner.registry.upsert(task.clone(), cancel.clone(), position);
            inner.events.emit(Event::TaskAssigned { id: task.id.clone(), attempt: task.attempt });

            if let Err(err) = inner.persist(&task).await {
                warn!(task = %task.id, %err, "assignment write failed; treating as transient failure");
                self.fail_attempt(task, position, true, format!("state store unavailable: {err}")).await;
                return;
            }

            let engine = self.clone();
            tokio::spawn(async move {
                engine.run_task(task, cancel, position).await;
            });
        })
    }

    /// Start queued tasks while slots are free. The slot is reserved
    /// before the pop so a concurrent admitter cannot take it in
    /// between.
    pub(crate) async fn pump_waiting(&self) {
        let inner = &self.inner;
        loop {
            if inner.paused() || inner.shutdown.is_cancelled() {
                return;
            }
            if !inner.try_acquire_slot() {
                return;
            }
            let next = inner.waiting.lock().pop();
            let Some(waiting) = next else {
                inner.release_slot();
                return;
            };
            inner.admission_gate.notify_one();
            if inner.take_intent(&waiting.task.id) {
                inner.release_slot();
                self.finish_queued_cancel(waiting).await;
                continue;
            }
            self.admit(waiting.task, waiting.position).await;
        }
    }

    /// Terminal-fail a record that never decoded, committing its offset
    /// so a poison message cannot loop.
    async fn reject_malformed(&self, record: &Record, position: BusPosition, err: serde_json::Error) {
        let inner = &self.inner;
        warn!(
            partition = record.partition,
            offset = record.offset,
            %err,
            "malformed task record"
        );
        let id = TaskId::from_bus_position(record.partition, record.offset);
        let now = inner.clock.epoch_ms();
        let mut doc = Task::new(id.clone(), "unknown", TaskPayload::default(), 0, now);
        doc.fail(format!("malformed task record: {err}"), now);
        // Best effort: committing past the poison record matters more
        // than the tombstone document.
        let _ = inner.persist_terminal(&doc).await;
        inner.stats.record_failed();
        inner.events.emit(Event::TaskFailed {
            id,
            attempt: 0,
            error: "malformed task record".to_string(),
        });
        inner.commit(position).await;
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
