// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key namespaces for the state store.

use fm_core::{ServerId, TaskId};

/// Prefix for task documents.
pub const TASK_PREFIX: &str = "task:";

/// Prefix for worker records.
pub const WORKER_PREFIX: &str = "worker:";

pub fn task_key(id: &TaskId) -> String {
    format!("{TASK_PREFIX}{id}")
}

pub fn worker_key(id: &ServerId) -> String {
    format!("{WORKER_PREFIX}{id}")
}

/// Recover the task id from a `task:` key, if it is one.
pub fn task_id_of(key: &str) -> Option<TaskId> {
    key.strip_prefix(TASK_PREFIX).map(TaskId::from)
}
