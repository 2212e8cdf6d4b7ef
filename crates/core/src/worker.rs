// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker server records tracked by the registry.

use crate::capability::CapabilitySet;
use crate::id::ServerId;
use serde::{Deserialize, Serialize};

/// Probed health of a worker server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    /// Last probe succeeded and the worker reported itself healthy.
    Healthy,
    /// The worker answered the probe but reported a degraded status.
    Unhealthy,
    /// The probe itself failed (connection refused, timeout).
    Unreachable,
}

crate::simple_display! {
    WorkerHealth {
        Healthy => "healthy",
        Unhealthy => "unhealthy",
        Unreachable => "unreachable",
    }
}

/// Inventory record for one worker server.
///
/// The capability set is authoritative from the last successful
/// details fetch; an `unregister` announcement purges the record.
/// Stored under `worker:<server_id>` as the durable projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub server_id: ServerId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    pub health: WorkerHealth,
    pub last_check_at_ms: u64,
    pub registered_at_ms: u64,
}

impl WorkerRecord {
    /// Only healthy workers are eligible for capability matching.
    pub fn is_available(&self) -> bool {
        self.health == WorkerHealth::Healthy
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
