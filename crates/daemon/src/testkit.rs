// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process test plane: engine + worker registry wired to the
//! in-memory adapters, with helpers for driving scenarios.

#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use crate::commands;
use crate::engine::{Engine, EngineConfig, EngineDeps};
use crate::events::EventFeed;
use crate::handler::HandlerRegistry;
use crate::metrics::Stats;
use crate::workers::{ControlPlane, FakeControlPlane, ProbeIntervals, WorkerRegistry};
use fm_bus::{topics, Bus, MemoryBus};
use fm_core::{FakeClock, RetryPolicy, Task, TaskId, TaskState};
use fm_store::{docs, keys, MemoryStore, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything a scenario needs, already running.
pub struct TestPlane {
    pub bus: MemoryBus,
    pub store: Arc<MemoryStore<FakeClock>>,
    pub clock: FakeClock,
    pub handlers: Arc<HandlerRegistry>,
    pub stats: Arc<Stats>,
    pub events: EventFeed,
    pub engine: Engine<FakeClock>,
    pub workers: WorkerRegistry<FakeClock>,
    pub control: Arc<FakeControlPlane>,
    tasks: Vec<JoinHandle<()>>,
}

/// Build and start a test plane. The engine consumer loop and the
/// command feed run; worker probe loops are driven manually via
/// `probe_all`/`discover_once` so tests control the cadence.
pub async fn start(config: EngineConfig, policy: RetryPolicy) -> TestPlane {
    let clock = FakeClock::new();
    let bus = MemoryBus::new();
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let handlers = Arc::new(HandlerRegistry::new());
    let stats = Arc::new(Stats::new());
    let events = EventFeed::new();
    let control = Arc::new(FakeControlPlane::new());

    let bus_dyn: Arc<dyn Bus> = Arc::new(bus.clone());
    let store_dyn: Arc<dyn StateStore> = Arc::clone(&store) as Arc<dyn StateStore>;

    let engine = Engine::new(
        EngineDeps {
            bus: Arc::clone(&bus_dyn),
            store: Arc::clone(&store_dyn),
            handlers: Arc::clone(&handlers),
            stats: Arc::clone(&stats),
            events: events.clone(),
            clock: clock.clone(),
        },
        config,
        policy,
        topics::ENGINE_GROUP,
    );

    let workers = WorkerRegistry::new(
        Arc::clone(&control) as Arc<dyn ControlPlane>,
        Arc::clone(&store_dyn),
        events.clone(),
        clock.clone(),
        ProbeIntervals::default(),
    );

    let mut tasks = Vec::new();

    let task_sub = bus
        .subscribe(topics::TASKS, topics::ENGINE_GROUP)
        .await
        .unwrap_or_else(|_| unreachable!("standard topic"));
    let consumer = engine.clone();
    tasks.push(tokio::spawn(async move { consumer.run(task_sub).await }));

    let command_sub = bus
        .subscribe(topics::COMMANDS, topics::ENGINE_GROUP)
        .await
        .unwrap_or_else(|_| unreachable!("standard topic"));
    let command_engine = engine.clone();
    let command_bus = Arc::clone(&bus_dyn);
    tasks.push(tokio::spawn(async move {
        commands::run_feed(command_engine, command_sub, command_bus, topics::ENGINE_GROUP).await
    }));

    TestPlane { bus, store, clock, handlers, stats, events, engine, workers, control, tasks }
}

impl TestPlane {
    /// Submit the way the control surface does: pending document first,
    /// then publish keyed by `<priority>-<enqueue_ms>`.
    pub async fn submit(&self, task: &Task) {
        self.store
            .put(&keys::task_key(&task.id), docs::encode_task(task), None)
            .await
            .unwrap_or_else(|_| unreachable!("memory store"));
        let key = format!("{}-{}", task.priority, task.created_at_ms);
        self.publish_raw(&key, serde_json::to_vec(task).unwrap_or_default()).await;
    }

    /// Publish arbitrary bytes onto the task topic.
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) {
        self.bus
            .publish(topics::TASKS, key, payload)
            .await
            .unwrap_or_else(|_| unreachable!("standard topic"));
    }

    /// Current state-store document for a task.
    pub async fn task_doc(&self, id: &str) -> Option<Task> {
        let key = keys::task_key(&TaskId::new(id));
        let bytes = self.store.get(&key).await.ok()??;
        docs::decode_task(&key, &bytes).ok()
    }

    /// Await a task document reaching `state`, bounded by `timeout`.
    /// Panics (test context) when the bound is exceeded.
    pub async fn wait_for_state(&self, id: &str, state: TaskState, timeout: Duration) -> Task {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(doc) = self.task_doc(id).await {
                if doc.state == state {
                    return doc;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let current = self.task_doc(id).await.map(|d| d.state);
                panic!("task {id} never reached {state}; last seen {current:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Let spawned work make progress for roughly `duration` of tokio
    /// time (paused clocks advance instantly).
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Stop the plane: drain the engine, stop loops.
    pub async fn stop(self) {
        self.engine.shutdown(Duration::from_secs(5)).await;
        self.workers.shutdown();
        for task in self.tasks {
            task.abort();
        }
    }
}
