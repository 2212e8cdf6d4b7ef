// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: file-loaded settings plus the runtime
//! UpdateConfig surface.

use crate::engine::EngineConfig;
use crate::workers::ProbeIntervals;
use fm_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Settings loaded from `foreman.toml`, all optional with defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Root state directory; `$FOREMAN_STATE_DIR` overrides.
    pub state_dir: Option<PathBuf>,
    pub max_concurrent_tasks: usize,
    pub attempt_timeout_ms: u64,
    pub waiting_capacity: usize,
    /// Initial pause state.
    pub paused: bool,
    pub retry: RetryPolicy,
    pub health_check_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            max_concurrent_tasks: 8,
            attempt_timeout_ms: 30_000,
            waiting_capacity: 64,
            paused: false,
            retry: RetryPolicy::default(),
            health_check_interval_ms: 30_000,
            discovery_interval_ms: 60_000,
            drain_timeout_ms: 10_000,
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file; a missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else { return Ok(Self::default()) };
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: DaemonConfig = toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config
            .retry
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn resolve_state_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("FOREMAN_STATE_DIR") {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        crate::env::state_dir().ok_or(ConfigError::NoStateDir)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_tasks: self.max_concurrent_tasks,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            waiting_capacity: self.waiting_capacity,
        }
    }

    pub fn probe_intervals(&self) -> ProbeIntervals {
        ProbeIntervals {
            health_check: Duration::from_millis(self.health_check_interval_ms),
            discovery: Duration::from_millis(self.discovery_interval_ms),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Paths derived from the state directory.
pub fn socket_path(state_dir: &Path) -> PathBuf {
    state_dir.join("daemon.sock")
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join("daemon.pid")
}

pub fn log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("daemon.log")
}

/// A parsed UpdateConfig request. Unknown keys and ill-typed values
/// reject the whole request with no side effects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub max_concurrent_tasks: Option<usize>,
    pub attempt_timeout_ms: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub retry_initial_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub retry_factor: Option<f64>,
    pub paused: Option<bool>,
    pub health_check_interval_ms: Option<u64>,
    pub discovery_interval_ms: Option<u64>,
}

impl ConfigUpdate {
    pub fn parse(changes: &HashMap<String, serde_json::Value>) -> Result<Self, String> {
        let mut update = ConfigUpdate::default();
        for (key, value) in changes {
            match key.as_str() {
                "max_concurrent_tasks" => {
                    update.max_concurrent_tasks = Some(require_u64(key, value)? as usize)
                }
                "attempt_timeout_ms" => update.attempt_timeout_ms = Some(require_u64(key, value)?),
                "retry.max_attempts" => {
                    update.retry_max_attempts = Some(require_u64(key, value)? as u32)
                }
                "retry.initial_delay_ms" => {
                    update.retry_initial_delay_ms = Some(require_u64(key, value)?)
                }
                "retry.max_delay_ms" => update.retry_max_delay_ms = Some(require_u64(key, value)?),
                "retry.factor" => update.retry_factor = Some(require_f64(key, value)?),
                "paused" => update.paused = Some(require_bool(key, value)?),
                "health_check_interval_ms" => {
                    update.health_check_interval_ms = Some(require_u64(key, value)?)
                }
                "discovery_interval_ms" => {
                    update.discovery_interval_ms = Some(require_u64(key, value)?)
                }
                other => return Err(format!("unrecognised key: {other}")),
            }
        }
        Ok(update)
    }

    /// Fold into an engine config + retry policy + probe intervals,
    /// validating the merged retry policy.
    pub fn merged(
        &self,
        engine: EngineConfig,
        retry: RetryPolicy,
        intervals: ProbeIntervals,
    ) -> Result<(EngineConfig, RetryPolicy, ProbeIntervals), String> {
        let mut engine = engine;
        if let Some(v) = self.max_concurrent_tasks {
            if v == 0 {
                return Err("max_concurrent_tasks must be at least 1".to_string());
            }
            engine.max_concurrent_tasks = v;
        }
        if let Some(v) = self.attempt_timeout_ms {
            engine.attempt_timeout = Duration::from_millis(v);
        }

        let mut retry = retry;
        if let Some(v) = self.retry_max_attempts {
            retry.max_attempts = v;
        }
        if let Some(v) = self.retry_initial_delay_ms {
            retry.initial_delay_ms = v;
        }
        if let Some(v) = self.retry_max_delay_ms {
            retry.max_delay_ms = v;
        }
        if let Some(v) = self.retry_factor {
            retry.factor = v;
        }
        retry.validate().map_err(|e| e.to_string())?;

        let mut intervals = intervals;
        if let Some(v) = self.health_check_interval_ms {
            intervals.health_check = Duration::from_millis(v);
        }
        if let Some(v) = self.discovery_interval_ms {
            intervals.discovery = Duration::from_millis(v);
        }

        Ok((engine, retry, intervals))
    }
}

fn require_u64(key: &str, value: &serde_json::Value) -> Result<u64, String> {
    value.as_u64().ok_or_else(|| format!("{key} must be a non-negative integer"))
}

fn require_f64(key: &str, value: &serde_json::Value) -> Result<f64, String> {
    value.as_f64().ok_or_else(|| format!("{key} must be a number"))
}

fn require_bool(key: &str, value: &serde_json::Value) -> Result<bool, String> {
    value.as_bool().ok_or_else(|| format!("{key} must be a boolean"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
