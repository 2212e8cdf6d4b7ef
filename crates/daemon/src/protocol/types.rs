// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DTO structs for the control protocol.

use fm_core::{Task, TaskId, TaskState, WorkerHealth, WorkerRecord};
use serde::{Deserialize, Serialize};

/// Task document rendered for listings and status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub kind: String,
    pub priority: u8,
    pub state: TaskState,
    pub attempt: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        TaskSummary {
            id: task.id.clone(),
            kind: task.kind.clone(),
            priority: task.priority,
            state: task.state,
            attempt: task.attempt,
            created_at_ms: task.created_at_ms,
            updated_at_ms: task.updated_at_ms,
            worker_id: task.worker_id.as_ref().map(|w| w.to_string()),
            last_error: task.last_error.clone(),
        }
    }
}

/// Worker record rendered for discovery and inventory queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub server_id: String,
    pub name: String,
    pub version: String,
    pub endpoints: Vec<String>,
    pub capabilities: Vec<String>,
    pub health: WorkerHealth,
    pub last_check_at_ms: u64,
    pub registered_at_ms: u64,
}

impl From<&WorkerRecord> for WorkerEntry {
    fn from(record: &WorkerRecord) -> Self {
        WorkerEntry {
            server_id: record.server_id.to_string(),
            name: record.name.clone(),
            version: record.version.clone(),
            endpoints: record.endpoints.clone(),
            capabilities: record.capabilities.iter().map(str::to_string).collect(),
            health: record.health,
            last_check_at_ms: record.last_check_at_ms,
            registered_at_ms: record.registered_at_ms,
        }
    }
}

/// Filter for task listings. All fields conjunctive; absent = any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(state) = self.state {
            if task.state != state {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if &task.kind != kind {
                return false;
            }
        }
        true
    }
}
