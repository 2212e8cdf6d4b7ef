// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admin commands carried on the command topic.

use crate::id::TaskId;
use serde::{Deserialize, Serialize};

/// Command message consumed by every dispatch engine instance.
///
/// Unknown commands deserialize to `Unknown` and are logged then
/// ignored, so rolling out new commands never wedges old daemons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Stop admitting new tasks; in-flight work continues.
    Pause,
    /// Resume admission.
    Resume,
    /// Log a stats snapshot on each instance.
    Stats,
    /// Cancel one task wherever it is running.
    Cancel { id: TaskId },
    /// Catch-all for unrecognised commands.
    #[serde(other, skip_serializing)]
    Unknown,
}

impl Command {
    /// Decode a command topic payload. Returns `None` for byte streams
    /// that are not JSON at all; unknown-but-valid commands come back as
    /// [`Command::Unknown`].
    pub fn decode(payload: &[u8]) -> Option<Command> {
        serde_json::from_slice(payload).ok()
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Pause => f.write_str("pause"),
            Command::Resume => f.write_str("resume"),
            Command::Stats => f.write_str("stats"),
            Command::Cancel { id } => write!(f, "cancel {id}"),
            Command::Unknown => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
