// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Task ids may be assigned by the submitting client or minted by the
//! control surface; worker server ids always come from the worker's own
//! registration announcement, so neither type constrains its format
//! beyond being a string.

crate::string_id! {
    /// Unique identifier for a task.
    pub struct TaskId("task-");
}

impl TaskId {
    /// Derive a deterministic id for a record that arrived without one
    /// (e.g. a malformed bus message that still needs a terminal
    /// failure document).
    pub fn from_bus_position(partition: u32, offset: u64) -> Self {
        Self(format!("task-p{partition}-o{offset}"))
    }
}

crate::string_id! {
    /// Unique identifier for a worker server.
    pub struct ServerId("srv-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
