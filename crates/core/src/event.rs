// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events describing observable state changes.
//!
//! Serializes with `{"type": "scope:name", ...fields}` format. Unknown
//! type tags deserialize to `Custom` so old readers survive new events.

use crate::id::{ServerId, TaskId};
use crate::worker::WorkerHealth;
use serde::{Deserialize, Serialize};

/// State changes published on the daemon's broadcast feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- task --
    #[serde(rename = "task:submitted")]
    TaskSubmitted { id: TaskId, kind: String, priority: u8 },

    #[serde(rename = "task:assigned")]
    TaskAssigned { id: TaskId, attempt: u32 },

    #[serde(rename = "task:started")]
    TaskStarted { id: TaskId, attempt: u32 },

    #[serde(rename = "task:completed")]
    TaskCompleted { id: TaskId, attempt: u32 },

    #[serde(rename = "task:failed")]
    TaskFailed { id: TaskId, attempt: u32, error: String },

    /// A transient failure was absorbed; the task will re-enter the bus
    /// after `delay_ms`.
    #[serde(rename = "task:retrying")]
    TaskRetrying { id: TaskId, attempt: u32, delay_ms: u64, error: String },

    #[serde(rename = "task:cancelled")]
    TaskCancelled { id: TaskId },

    // -- worker --
    #[serde(rename = "worker:registered")]
    WorkerRegistered { server_id: ServerId, name: String },

    #[serde(rename = "worker:health_changed")]
    WorkerHealthChanged { server_id: ServerId, health: WorkerHealth },

    #[serde(rename = "worker:unregistered")]
    WorkerUnregistered { server_id: ServerId },

    // -- engine --
    #[serde(rename = "engine:paused")]
    EnginePaused,

    #[serde(rename = "engine:resumed")]
    EngineResumed,

    /// Catch-all for unknown event types (extensibility)
    #[serde(other, skip_serializing)]
    Custom,
}

impl Event {
    /// Task id this event concerns, when it concerns one.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::TaskSubmitted { id, .. }
            | Event::TaskAssigned { id, .. }
            | Event::TaskStarted { id, .. }
            | Event::TaskCompleted { id, .. }
            | Event::TaskFailed { id, .. }
            | Event::TaskRetrying { id, .. }
            | Event::TaskCancelled { id } => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
