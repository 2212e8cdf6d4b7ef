// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{TaskSummary, WorkerEntry};
use crate::metrics::{MetricPoint, StatsSnapshot};
use fm_core::{Task, TaskId, TaskState};
use serde::{Deserialize, Serialize};

/// Response from the daemon to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Health check response
    Pong,

    /// Version handshake response
    Hello { version: String },

    /// Daemon is shutting down
    ShuttingDown,

    /// Error response
    Error { message: String },

    /// Submit accepted (or deduplicated onto an existing document)
    Submitted { id: TaskId, state: TaskState },

    /// Cancel acknowledged
    Cancelled { id: TaskId, message: String },

    /// Full task document
    Task { task: Option<Box<Task>> },

    /// Task listing
    Tasks { tasks: Vec<TaskSummary> },

    /// Engine + counter status
    SystemStatus {
        paused: bool,
        active_tasks: usize,
        queued_tasks: usize,
        stats: StatsSnapshot,
    },

    /// Matching workers, stable-ordered
    Workers { workers: Vec<WorkerEntry> },

    /// Counter snapshot
    Metrics { points: Vec<MetricPoint> },

    /// Daemon log tail
    Logs { content: String },

    /// Daemon health summary
    Health {
        status: String,
        timestamp_ms: u64,
        stats: StatsSnapshot,
        active_tasks: usize,
    },

    /// One worker record
    Server { server: Option<Box<WorkerEntry>> },

    /// Terminal documents removed
    TasksPruned { pruned: usize, skipped: usize },

    /// Daemon process status
    Status {
        uptime_secs: u64,
        version: String,
        paused: bool,
        active_tasks: usize,
        queued_tasks: usize,
        workers: usize,
    },
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
