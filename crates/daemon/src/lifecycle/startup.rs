// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and recovery.

use super::{DaemonState, LifecycleError};
use crate::commands;
use crate::config::{self, DaemonConfig};
use crate::engine::{Engine, EngineDeps};
use crate::events::EventFeed;
use crate::handler::HandlerRegistry;
use crate::listener::{ListenCtx, Listener};
use crate::metrics::Stats;
use crate::workers::{ControlPlane, WorkerRegistry};
use fm_bus::{topics, Bus};
use fm_core::{SystemClock, TaskState};
use fm_store::{docs, keys, StateStore};
use fs2::FileExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Upper bound on startup re-publication; anything beyond this waits
/// for the next restart or a client retry.
const RECOVERY_SWEEP_LIMIT: usize = 1_000;

/// External collaborators the daemon is wired to.
///
/// The binary wires the in-process adapters; embedders and tests can
/// substitute their own.
pub struct DaemonDeps {
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StateStore>,
    pub control: Arc<dyn ControlPlane>,
    pub handlers: Arc<HandlerRegistry>,
}

/// Result of daemon startup. The listener is returned separately to be
/// spawned by the caller.
pub struct StartupResult {
    pub daemon: DaemonState,
    pub listener: Listener<SystemClock>,
}

impl std::fmt::Debug for StartupResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupResult").finish_non_exhaustive()
    }
}

/// Start the daemon.
pub async fn startup(config: DaemonConfig, deps: DaemonDeps) -> Result<StartupResult, LifecycleError> {
    let state_dir = config.resolve_state_dir()?;
    std::fs::create_dir_all(&state_dir)?;

    // Acquire the PID lock first to prevent startup races. Open
    // without truncation so a losing contender does not wipe the
    // winner's PID.
    let lock_path = config::lock_path(&state_dir);
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    let clock = SystemClock;
    let events = EventFeed::new();
    let stats = Arc::new(Stats::new());

    // Worker registry first: discovery begins before task consumption.
    let workers = WorkerRegistry::new(
        Arc::clone(&deps.control),
        Arc::clone(&deps.store),
        events.clone(),
        clock,
        config.probe_intervals(),
    );
    let mut tasks = Vec::new();

    let registry_sub = deps.bus.subscribe(topics::SERVER_REGISTRY, topics::REGISTRY_GROUP).await?;
    {
        let workers = workers.clone();
        let bus = Arc::clone(&deps.bus);
        tasks.push(tokio::spawn(async move { workers.run_feed(registry_sub, bus).await }));
    }
    {
        let workers = workers.clone();
        tasks.push(tokio::spawn(async move { workers.run_health_loop().await }));
    }
    {
        let workers = workers.clone();
        tasks.push(tokio::spawn(async move { workers.run_discovery_loop().await }));
    }

    // Recovery sweep: in-process retry timers died with the previous
    // process; re-publish documents still marked pending.
    let recovered = recovery_sweep(&*deps.store, &*deps.bus).await;
    if recovered > 0 {
        info!(recovered, "re-published pending tasks from the state store");
    }

    // Dispatch engine: consumption begins.
    let engine = Engine::new(
        EngineDeps {
            bus: Arc::clone(&deps.bus),
            store: Arc::clone(&deps.store),
            handlers: Arc::clone(&deps.handlers),
            stats: Arc::clone(&stats),
            events: events.clone(),
            clock,
        },
        config.engine_config(),
        config.retry,
        topics::ENGINE_GROUP,
    );
    if config.paused {
        engine.pause();
    }

    let task_sub = deps.bus.subscribe(topics::TASKS, topics::ENGINE_GROUP).await?;
    {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move { engine.run(task_sub).await }));
    }

    // Per-instance command group so commands behave as broadcasts.
    let command_group = format!("{}-{}", topics::ENGINE_GROUP, std::process::id());
    let command_sub = deps.bus.subscribe(topics::COMMANDS, &command_group).await?;
    {
        let engine = engine.clone();
        let bus = Arc::clone(&deps.bus);
        tasks.push(tokio::spawn(async move {
            commands::run_feed(engine, command_sub, bus, &command_group).await
        }));
    }

    // Control surface last: accept traffic only once everything runs.
    let socket_path = config::socket_path(&state_dir);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let unix = UnixListener::bind(&socket_path)
        .map_err(|e| LifecycleError::BindFailed(socket_path.clone(), e))?;

    let shutdown = Arc::new(Notify::new());
    let listener = Listener::new(
        unix,
        Arc::new(ListenCtx {
            engine: engine.clone(),
            workers: workers.clone(),
            bus: Arc::clone(&deps.bus),
            store: Arc::clone(&deps.store),
            clock,
            log_path: config::log_path(&state_dir),
            start_time: Instant::now(),
            shutdown: Arc::clone(&shutdown),
        }),
    );

    info!(state_dir = %state_dir.display(), "daemon started");

    Ok(StartupResult {
        daemon: DaemonState {
            config,
            state_dir,
            lock_file,
            engine,
            workers,
            shutdown,
            start_time: Instant::now(),
            tasks,
        },
        listener,
    })
}

/// Re-publish pending documents, bounded, keyed by task id.
async fn recovery_sweep(store: &dyn StateStore, bus: &dyn Bus) -> usize {
    let entries = match store.list_prefix(keys::TASK_PREFIX).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%err, "recovery sweep could not list the store");
            return 0;
        }
    };
    let mut republished = 0;
    for (key, bytes) in entries {
        if republished >= RECOVERY_SWEEP_LIMIT {
            warn!(limit = RECOVERY_SWEEP_LIMIT, "recovery sweep limit reached");
            break;
        }
        let Ok(task) = docs::decode_task(&key, &bytes) else {
            warn!(%key, "skipping undecodable document in recovery sweep");
            continue;
        };
        if task.state != TaskState::Pending {
            continue;
        }
        match serde_json::to_vec(&task) {
            Ok(body) => match bus.publish(topics::TASKS, task.id.as_str(), body).await {
                Ok(()) => republished += 1,
                Err(err) => warn!(task = %task.id, %err, "recovery re-publish failed"),
            },
            Err(err) => warn!(task = %task.id, %err, "recovery encode failed"),
        }
    }
    republished
}
