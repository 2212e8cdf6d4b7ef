// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task document and lifecycle state machine.

use crate::id::{ServerId, TaskId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// Transitions form a DAG with no edges out of the terminal states:
///
/// ```text
/// Pending -> Assigned -> Processing -> Completed | Failed | Cancelled
///    ^                       |
///    +------- retry ---------+
/// ```
///
/// Cancellation may also short-circuit from `Pending`/`Assigned` when a
/// cancel intent arrives before the handler starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }

    /// Whether the lifecycle DAG has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match self {
            Pending => matches!(next, Assigned | Cancelled),
            Assigned => matches!(next, Processing | Cancelled),
            Processing => matches!(next, Completed | Failed | Cancelled | Pending),
            Completed | Failed | Cancelled => false,
        }
    }
}

crate::simple_display! {
    TaskState {
        Pending => "pending",
        Assigned => "assigned",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Opaque task payload with its declared content type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub data: Vec<u8>,
    /// MIME-ish hint for the handler; the core never inspects the bytes.
    #[serde(default)]
    pub content_type: String,
}

impl TaskPayload {
    pub fn new(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self { data: data.into(), content_type: content_type.into() }
    }

    /// Convenience for text payloads.
    pub fn text(s: impl Into<String>) -> Self {
        Self { data: s.into().into_bytes(), content_type: "text/plain".to_string() }
    }
}

/// A unit of work submitted to the control plane.
///
/// This struct is both the bus message body and the state-store document
/// (`task:<id>`); every lifecycle transition rewrites the stored copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Selects the handler that executes this task.
    pub kind: String,
    /// Higher runs earlier; equal priorities run FIFO.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub payload: TaskPayload,
    /// 0-based attempt count; bumped on every re-admission.
    #[serde(default)]
    pub attempt: u32,
    pub state: TaskState,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<ServerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Absolute wall-clock deadline; the per-attempt timeout is engine config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl Task {
    /// Create a freshly submitted task in `Pending`.
    pub fn new(id: TaskId, kind: impl Into<String>, payload: TaskPayload, priority: u8, now_ms: u64) -> Self {
        Self {
            id,
            kind: kind.into(),
            priority,
            payload,
            attempt: 0,
            state: TaskState::Pending,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            worker_id: None,
            result: None,
            last_error: None,
            deadline_ms: None,
        }
    }

    /// Apply a lifecycle transition, stamping `updated_at_ms`.
    ///
    /// Callers are responsible for only requesting edges that exist in
    /// the DAG; [`TaskState::can_transition_to`] is the check.
    pub fn transition(&mut self, next: TaskState, now_ms: u64) {
        self.state = next;
        self.updated_at_ms = now_ms;
    }

    /// Record a successful attempt.
    pub fn complete(&mut self, result: Vec<u8>, now_ms: u64) {
        self.result = Some(result);
        self.transition(TaskState::Completed, now_ms);
    }

    /// Record a terminal failure.
    pub fn fail(&mut self, error: impl Into<String>, now_ms: u64) {
        self.last_error = Some(error.into());
        self.transition(TaskState::Failed, now_ms);
    }

    /// Rewind to `Pending` for the next attempt, annotating the error
    /// that caused the retry. `attempt` only ever grows.
    pub fn for_retry(&self, error: impl Into<String>, now_ms: u64) -> Task {
        let mut next = self.clone();
        next.attempt += 1;
        next.last_error = Some(error.into());
        next.worker_id = None;
        next.transition(TaskState::Pending, now_ms);
        next
    }

    /// Wall-clock deadline check (distinct from the per-attempt timeout).
    pub fn past_deadline(&self, now_ms: u64) -> bool {
        self.deadline_ms.is_some_and(|d| now_ms >= d)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use builder::TaskBuilder;

#[cfg(any(test, feature = "test-support"))]
mod builder {
    use super::*;

    /// Test builder with sensible defaults.
    pub struct TaskBuilder {
        id: TaskId,
        kind: String,
        priority: u8,
        payload: TaskPayload,
        now_ms: u64,
    }

    impl Default for TaskBuilder {
        fn default() -> Self {
            Self {
                id: TaskId::new("task-test"),
                kind: "echo".to_string(),
                priority: 0,
                payload: TaskPayload::text("hello"),
                now_ms: 1_000,
            }
        }
    }

    impl TaskBuilder {
        pub fn id(mut self, id: impl Into<TaskId>) -> Self {
            self.id = id.into();
            self
        }

        pub fn kind(mut self, kind: impl Into<String>) -> Self {
            self.kind = kind.into();
            self
        }

        pub fn priority(mut self, priority: u8) -> Self {
            self.priority = priority;
            self
        }

        pub fn payload(mut self, payload: TaskPayload) -> Self {
            self.payload = payload;
            self
        }

        pub fn now_ms(mut self, now_ms: u64) -> Self {
            self.now_ms = now_ms;
            self
        }

        pub fn build(self) -> Task {
            Task::new(self.id, self.kind, self.payload, self.priority, self.now_ms)
        }
    }

    impl Task {
        /// Create a builder with test defaults.
        pub fn builder() -> TaskBuilder {
            TaskBuilder::default()
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
