// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup order, graceful shutdown, recovery.
//!
//! Startup brings components up leaves-first (store, bus, worker
//! registry, recovery sweep, dispatch engine, listener); shutdown
//! reverses the order and honours the configured drain timeout.

mod startup;

pub use startup::{startup, DaemonDeps, StartupResult};

use crate::config::{self, DaemonConfig};
use crate::engine::Engine;
use crate::workers::WorkerRegistry;
use fm_core::SystemClock;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Daemon runtime with the concrete clock.
pub type DaemonEngine = Engine<SystemClock>;

/// Running daemon state.
pub struct DaemonState {
    pub config: DaemonConfig,
    pub state_dir: PathBuf,
    // NOTE(lifetime): held to maintain the exclusive PID-file lock;
    // released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub engine: DaemonEngine,
    pub workers: WorkerRegistry<SystemClock>,
    /// Notified by the listener when a client requests shutdown.
    pub shutdown: Arc<Notify>,
    pub start_time: Instant,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

impl DaemonState {
    /// Shut down gracefully. Returns true on a clean drain.
    pub async fn shutdown(mut self) -> bool {
        info!("shutting down daemon");
        let clean = self.engine.shutdown(self.config.drain_timeout()).await;
        self.workers.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }

        let socket = config::socket_path(&self.state_dir);
        if socket.exists() {
            if let Err(e) = std::fs::remove_file(&socket) {
                warn!("failed to remove socket file: {}", e);
            }
        }
        let lock = config::lock_path(&self.state_dir);
        if lock.exists() {
            if let Err(e) = std::fs::remove_file(&lock) {
                warn!("failed to remove PID file: {}", e);
            }
        }

        info!(clean, "daemon shutdown complete");
        clean
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("bus error during startup: {0}")]
    Bus(#[from] fm_bus::BusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
