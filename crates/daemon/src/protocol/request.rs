// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::TaskFilter;
use fm_core::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello { version: String },

    /// Submit a task. The daemon assigns an id when absent.
    Submit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<TaskId>,
        kind: String,
        #[serde(default)]
        payload: Vec<u8>,
        #[serde(default)]
        content_type: String,
        #[serde(default)]
        priority: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deadline_ms: Option<u64>,
    },

    /// Cancel a task wherever it is (idempotent).
    Cancel { id: TaskId },

    /// Full task document by id.
    GetTaskStatus { id: TaskId },

    /// List task documents matching a filter.
    ListTasks {
        #[serde(default)]
        filter: TaskFilter,
    },

    /// Gate admission on every engine instance.
    Pause,

    /// Reopen admission on every engine instance.
    Resume,

    /// Engine status plus counters.
    GetSystemStatus,

    /// Merge recognised keys into the running configuration.
    UpdateConfig { changes: HashMap<String, serde_json::Value> },

    /// Healthy workers covering the requested capability set.
    DiscoverWorkers {
        #[serde(default)]
        capabilities: Vec<String>,
    },

    /// Counter snapshot as metric points.
    GetMetrics,

    /// Tail of the daemon log.
    GetLogs {
        #[serde(default)]
        lines: Option<usize>,
    },

    /// Daemon health summary.
    CheckHealth,

    /// One worker's inventory record.
    GetServerDetails { server_id: String },

    /// Every known worker server.
    DiscoverServers,

    /// Delete terminal task documents.
    PruneTasks {
        /// Delete regardless of age.
        #[serde(default)]
        all: bool,
        /// Preview only -- don't actually delete
        #[serde(default)]
        dry_run: bool,
    },

    /// Daemon process status (uptime, versions).
    Status,

    /// Request daemon shutdown.
    Shutdown,
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
