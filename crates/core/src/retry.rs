// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy: attempt limits and exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Validation failures for a [`RetryPolicy`].
#[derive(Debug, Error, PartialEq)]
pub enum RetryPolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("factor must be greater than 1.0 (got {0})")]
    FactorTooSmall(f64),

    #[error("max_delay_ms {max} is below initial_delay_ms {initial}")]
    MaxBelowInitial { initial: u64, max: u64 },
}

/// Backoff schedule for failed attempts.
///
/// The delay before retry `k` (1-based, counted from the first failure)
/// is `min(initial * factor^(k-1), max)`. A factor ≤ 1 would collapse
/// the schedule into a constant-rate hammer, so validation rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 means no retries.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_delay_ms: 1_000, max_delay_ms: 30_000, factor: 2.0 }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if self.factor <= 1.0 {
            return Err(RetryPolicyError::FactorTooSmall(self.factor));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RetryPolicyError::MaxBelowInitial {
                initial: self.initial_delay_ms,
                max: self.max_delay_ms,
            });
        }
        Ok(())
    }

    /// True when a task that has already used `attempts_made` attempts
    /// (its `attempt` field + 1 after the current failure) may run again.
    pub fn allows_another_attempt(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Backoff delay before retry `k` (1-based, counted from the first
    /// failure). Saturates at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63);
        let raw = (self.initial_delay_ms as f64) * self.factor.powi(exp as i32);
        let capped = if raw.is_finite() { raw.min(self.max_delay_ms as f64) } else { self.max_delay_ms as f64 };
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
