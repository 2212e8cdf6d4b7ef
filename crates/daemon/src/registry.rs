// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process authoritative map of active tasks.
//!
//! Holds every task in {pending, assigned, processing}; terminal tasks
//! live only in the state store. Admission decisions read this map, so
//! it is the duplicate-delivery guard and the concurrency gauge.

use fm_core::{Task, TaskId, TaskState};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Where a task's bus record sits; committed only on a terminal
/// per-attempt decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusPosition {
    pub partition: u32,
    pub offset: u64,
}

/// One active task with its cancellation handle.
#[derive(Clone)]
pub struct ActiveTask {
    pub task: Task,
    pub cancel: CancellationToken,
    pub position: BusPosition,
}

/// Concurrency-safe task-id index.
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<HashMap<TaskId, ActiveTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, task: Task, cancel: CancellationToken, position: BusPosition) {
        let mut map = self.inner.write();
        map.insert(task.id.clone(), ActiveTask { task, cancel, position });
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.inner.read().contains_key(id)
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.inner.read().get(id).map(|e| e.task.clone())
    }

    pub fn cancel_token(&self, id: &TaskId) -> Option<CancellationToken> {
        self.inner.read().get(id).map(|e| e.cancel.clone())
    }

    /// Mutate the stored task in place, returning the updated copy.
    pub fn update(&self, id: &TaskId, f: impl FnOnce(&mut Task)) -> Option<Task> {
        let mut map = self.inner.write();
        let entry = map.get_mut(id)?;
        f(&mut entry.task);
        Some(entry.task.clone())
    }

    pub fn remove(&self, id: &TaskId) -> Option<ActiveTask> {
        self.inner.write().remove(id)
    }

    /// Tasks counted against `max_concurrent_tasks`: assigned or
    /// processing. Pending entries are queued, not running.
    pub fn running_count(&self) -> usize {
        self.inner
            .read()
            .values()
            .filter(|e| matches!(e.task.state, TaskState::Assigned | TaskState::Processing))
            .count()
    }

    pub fn count_in(&self, state: TaskState) -> usize {
        self.inner.read().values().filter(|e| e.task.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Immutable snapshot for stats and drain decisions.
    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.read().values().map(|e| e.task.clone()).collect()
    }

    /// Cancellation handles for every active task (shutdown drain).
    pub fn all_tokens(&self) -> Vec<CancellationToken> {
        self.inner.read().values().map(|e| e.cancel.clone()).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
