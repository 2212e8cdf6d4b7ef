// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capability matching over the worker inventory.

use fm_core::{CapabilitySet, WorkerRecord};

/// Workers that are healthy and cover every required capability,
/// stable-ordered by (registered_at asc, server_id asc) so callers
/// observing the same inventory see the same head element.
pub fn matching_workers(workers: &[WorkerRecord], required: &CapabilitySet) -> Vec<WorkerRecord> {
    let mut matched: Vec<WorkerRecord> = workers
        .iter()
        .filter(|w| w.is_available() && w.capabilities.covers(required))
        .cloned()
        .collect();
    matched.sort_by(|a, b| {
        a.registered_at_ms
            .cmp(&b.registered_at_ms)
            .then_with(|| a.server_id.cmp(&b.server_id))
    });
    matched
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod tests;
