// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-derived settings: state directory, protocol version,
//! IPC timeouts.

use std::path::PathBuf;
use std::time::Duration;

/// Protocol version exchanged in the Hello handshake.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Root state directory for the daemon.
///
/// `$FOREMAN_STATE_DIR` wins; otherwise `$XDG_STATE_HOME/foreman` or
/// `~/.local/state/foreman`.
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("FOREMAN_STATE_DIR") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("state")))
        .map(|base| base.join("foreman"))
}

/// How long a client connection may take to deliver one request.
pub fn ipc_timeout() -> Duration {
    std::env::var("FOREMAN_IPC_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10))
}
