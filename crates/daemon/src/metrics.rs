// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide counters owned by the dispatch engine.
//!
//! Written from task futures, read lock-free by the control surface.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine counters.
#[derive(Debug, Default)]
pub struct Stats {
    processed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters, as rendered to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub retries: u64,
}

/// One named sample in a metrics response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: u64,
    pub at_ms: u64,
}

impl StatsSnapshot {
    /// Render the counters as metric points stamped `at_ms`.
    pub fn metric_points(&self, at_ms: u64) -> Vec<MetricPoint> {
        vec![
            MetricPoint { name: "tasks_processed".to_string(), value: self.processed, at_ms },
            MetricPoint { name: "tasks_failed".to_string(), value: self.failed, at_ms },
            MetricPoint { name: "task_retries".to_string(), value: self.retries, at_ms },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.record_retry();
        let snap = stats.snapshot();
        assert_eq!(snap, StatsSnapshot { processed: 2, failed: 1, retries: 1 });
    }

    #[test]
    fn metric_points_carry_the_stamp() {
        let snap = StatsSnapshot { processed: 5, failed: 0, retries: 2 };
        let points = snap.metric_points(9_000);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.at_ms == 9_000));
        assert_eq!(points[0].name, "tasks_processed");
        assert_eq!(points[0].value, 5);
    }
}
